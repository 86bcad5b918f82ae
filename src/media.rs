//! File-backed media store for uploaded profile pictures.
//!
//! Files live under the configured media root:
//! - Profile pictures: profile_pictures/<doctor_id>-<uuid>.<ext>
//!
//! The profile stores the path relative to the root.

use std::path::{Component, Path, PathBuf};

use tokio::fs;
use uuid::Uuid;

use crate::error::MediaError;

/// Well-known media directories.
pub mod paths {
    pub const PROFILE_PICTURES: &str = "profile_pictures";
}

/// Image formats accepted for profile pictures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
    Png,
    Webp,
}

impl ImageFormat {
    /// Detect the format from the file signature.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(Self::Jpeg)
        } else if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
            Some(Self::Png)
        } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
            Some(Self::Webp)
        } else {
            None
        }
    }

    /// Format named by a MIME type, if it is one we accept.
    pub fn from_mime(mime: &str) -> Option<Self> {
        let essence = mime.split(';').next().unwrap_or_default().trim();
        match essence.to_ascii_lowercase().as_str() {
            "image/jpeg" | "image/jpg" => Some(Self::Jpeg),
            "image/png" => Some(Self::Png),
            "image/webp" => Some(Self::Webp),
            _ => None,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
            Self::Webp => "webp",
        }
    }
}

/// A validated image ready to be stored.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub format: ImageFormat,
    pub bytes: Vec<u8>,
}

/// File-backed store rooted at the media directory.
pub struct MediaStore {
    base_path: PathBuf,
}

impl MediaStore {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Resolve a stored relative reference to an absolute path.
    ///
    /// Rejects absolute paths and any `..` component.
    pub fn resolve_path(&self, relative: &str) -> Result<PathBuf, MediaError> {
        let rel = Path::new(relative);
        let safe = !relative.is_empty()
            && rel.components().all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(MediaError::InvalidPath(relative.to_string()));
        }
        Ok(self.base_path.join(rel))
    }

    /// Ensure the media directory structure exists.
    pub async fn ensure_dirs(&self) -> Result<(), MediaError> {
        fs::create_dir_all(self.base_path.join(paths::PROFILE_PICTURES)).await?;
        Ok(())
    }

    /// Write a doctor's profile picture and return its relative reference.
    pub async fn save_profile_picture(
        &self,
        doctor_id: Uuid,
        image: &ImageUpload,
    ) -> Result<String, MediaError> {
        let reference = format!(
            "{}/{}-{}.{}",
            paths::PROFILE_PICTURES,
            doctor_id,
            Uuid::new_v4().simple(),
            image.format.extension()
        );
        let full_path = self.resolve_path(&reference)?;
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&full_path, &image.bytes).await?;
        tracing::debug!(doctor_id = %doctor_id, path = %reference, bytes = image.bytes.len(), "Stored profile picture");
        Ok(reference)
    }

    /// Delete a stored file. Missing files are not an error.
    pub async fn remove(&self, reference: &str) -> Result<(), MediaError> {
        let full_path = self.resolve_path(reference)?;
        match fs::remove_file(&full_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
