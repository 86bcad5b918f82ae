//! Configuration types.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Longest accepted session lifetime, roughly ten years.
pub const MAX_SESSION_TTL_HOURS: u64 = 10 * 366 * 24;

/// Service configuration, read from `CAREBOOK_*` environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Address the HTTP server binds to.
    pub bind_addr: SocketAddr,
    /// Path of the libSQL database file.
    pub db_path: PathBuf,
    /// Root directory for uploaded profile pictures.
    pub media_root: PathBuf,
    /// Lifetime of a login session.
    pub session_ttl: Duration,
    /// Largest accepted profile picture upload, in bytes.
    pub max_upload_bytes: usize,
    /// If set, logs are also written to a daily-rolling file in this directory.
    pub log_dir: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            db_path: PathBuf::from("./data/carebook.db"),
            media_root: PathBuf::from("./data/media"),
            session_ttl: Duration::from_secs(14 * 24 * 3600), // 14 days
            max_upload_bytes: 5 * 1024 * 1024,
            log_dir: None,
        }
    }
}

impl AppConfig {
    /// Build a config from the environment, falling back to defaults for
    /// unset variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let bind_addr = parse_env("CAREBOOK_BIND")?.unwrap_or(defaults.bind_addr);

        let db_path = std::env::var("CAREBOOK_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.db_path);

        let media_root = std::env::var("CAREBOOK_MEDIA_ROOT")
            .map(PathBuf::from)
            .unwrap_or(defaults.media_root);

        let session_ttl = parse_env::<u64>("CAREBOOK_SESSION_TTL_HOURS")?
            .map(session_ttl_from_hours)
            .transpose()?
            .unwrap_or(defaults.session_ttl);

        let max_upload_bytes =
            parse_env("CAREBOOK_MAX_UPLOAD_BYTES")?.unwrap_or(defaults.max_upload_bytes);

        let log_dir = std::env::var("CAREBOOK_LOG_DIR")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        Ok(Self {
            bind_addr,
            db_path,
            media_root,
            session_ttl,
            max_upload_bytes,
            log_dir,
        })
    }
}

/// Convert a TTL in hours, rejecting zero and anything past
/// [`MAX_SESSION_TTL_HOURS`].
fn session_ttl_from_hours(hours: u64) -> Result<Duration, ConfigError> {
    let invalid = |message: String| ConfigError::InvalidValue {
        key: "CAREBOOK_SESSION_TTL_HOURS".to_string(),
        message,
    };
    if hours == 0 || hours > MAX_SESSION_TTL_HOURS {
        return Err(invalid(format!(
            "must be between 1 and {MAX_SESSION_TTL_HOURS} hours, got {hours}"
        )));
    }
    hours
        .checked_mul(3600)
        .map(Duration::from_secs)
        .ok_or_else(|| invalid(format!("{hours} hours overflows")))
}

/// Read and parse an optional environment variable.
fn parse_env<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = AppConfig::default();
        assert_eq!(config.bind_addr.port(), 8000);
        assert_eq!(config.session_ttl, Duration::from_secs(336 * 3600));
        assert_eq!(config.max_upload_bytes, 5_242_880);
        assert!(config.log_dir.is_none());
    }

    #[test]
    fn session_ttl_bounds() {
        assert_eq!(session_ttl_from_hours(24).unwrap(), Duration::from_secs(86_400));
        assert!(session_ttl_from_hours(MAX_SESSION_TTL_HOURS).is_ok());
        assert!(matches!(
            session_ttl_from_hours(0),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            session_ttl_from_hours(MAX_SESSION_TTL_HOURS + 1),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            session_ttl_from_hours(u64::MAX),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn parse_env_missing_is_none() {
        let value: Option<u64> = parse_env("CAREBOOK_TEST_DEFINITELY_UNSET").unwrap();
        assert!(value.is_none());
    }
}
