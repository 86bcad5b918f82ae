//! Unified `Database` trait: single async interface for all persistence.

use async_trait::async_trait;
use uuid::Uuid;

use crate::accounts::{
    DoctorProfile, Identity, OnlineClinicDetail, PatientProfile, PracticeDetail, ProfileKind,
    Session, Specialization,
};
use crate::error::DatabaseError;

/// Backend-agnostic database trait covering accounts, wizard records, and sessions.
///
/// Every method that advances `registration_step` does so in the same
/// transaction as the record it writes, and never lowers the stored value.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn init_schema(&self) -> Result<(), DatabaseError>;

    // ── Identities ──────────────────────────────────────────────────

    /// Get an identity by ID.
    async fn get_identity(&self, id: Uuid) -> Result<Option<Identity>, DatabaseError>;

    /// Look up an identity by username (case-sensitive).
    async fn get_identity_by_username(
        &self,
        username: &str,
    ) -> Result<Option<Identity>, DatabaseError>;

    // ── Registration ────────────────────────────────────────────────

    /// Create an identity and its patient profile atomically.
    async fn create_patient_account(
        &self,
        identity: &Identity,
        profile: &PatientProfile,
    ) -> Result<(), DatabaseError>;

    /// Create an identity and its doctor profile atomically (wizard step 1).
    async fn create_doctor_account(
        &self,
        identity: &Identity,
        profile: &DoctorProfile,
    ) -> Result<(), DatabaseError>;

    /// Replace a doctor's specializations and advance the wizard cursor.
    async fn replace_specializations(
        &self,
        doctor_id: Uuid,
        names: &[String],
        step: i64,
    ) -> Result<Vec<Specialization>, DatabaseError>;

    /// Insert or update the doctor's practice details and advance the cursor.
    async fn save_practice_detail(
        &self,
        detail: &PracticeDetail,
        step: i64,
    ) -> Result<(), DatabaseError>;

    /// Insert or update the doctor's online clinic details and advance the cursor.
    async fn save_online_clinic(
        &self,
        detail: &OnlineClinicDetail,
        step: i64,
    ) -> Result<(), DatabaseError>;

    /// Store a profile picture reference and advance the cursor.
    async fn set_profile_picture(
        &self,
        doctor_id: Uuid,
        reference: &str,
        step: i64,
    ) -> Result<(), DatabaseError>;

    // ── Profiles ────────────────────────────────────────────────────

    /// Get the patient profile owned by an identity.
    async fn get_patient_profile(
        &self,
        identity_id: Uuid,
    ) -> Result<Option<PatientProfile>, DatabaseError>;

    /// Get the doctor profile owned by an identity.
    async fn get_doctor_profile(
        &self,
        identity_id: Uuid,
    ) -> Result<Option<DoctorProfile>, DatabaseError>;

    /// Resolve which profile (if any) an identity carries. Patient wins if both exist.
    async fn get_profile_kind(&self, identity_id: Uuid) -> Result<ProfileKind, DatabaseError> {
        if let Some(patient) = self.get_patient_profile(identity_id).await? {
            return Ok(ProfileKind::Patient(patient));
        }
        if let Some(doctor) = self.get_doctor_profile(identity_id).await? {
            return Ok(ProfileKind::Doctor(doctor));
        }
        Ok(ProfileKind::None)
    }

    /// List a doctor's specializations in insertion order.
    async fn list_specializations(
        &self,
        doctor_id: Uuid,
    ) -> Result<Vec<Specialization>, DatabaseError>;

    /// Get a doctor's practice details.
    async fn get_practice_detail(
        &self,
        doctor_id: Uuid,
    ) -> Result<Option<PracticeDetail>, DatabaseError>;

    /// Get a doctor's online clinic details.
    async fn get_online_clinic(
        &self,
        doctor_id: Uuid,
    ) -> Result<Option<OnlineClinicDetail>, DatabaseError>;

    // ── Sessions ────────────────────────────────────────────────────

    /// Persist a new session.
    async fn create_session(&self, session: &Session) -> Result<(), DatabaseError>;

    /// Get a session by token (expired sessions are returned as-is).
    async fn get_session(&self, token: &str) -> Result<Option<Session>, DatabaseError>;

    /// Delete a session. Returns whether it existed.
    async fn delete_session(&self, token: &str) -> Result<bool, DatabaseError>;

    /// Delete all expired sessions. Returns the number removed.
    async fn purge_expired_sessions(&self) -> Result<usize, DatabaseError>;
}
