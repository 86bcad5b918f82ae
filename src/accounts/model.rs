//! Account data model: identities, patient/doctor profiles and the
//! records a doctor fills in during the registration wizard.

use chrono::{DateTime, NaiveTime, Utc, Weekday};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An authenticated account.
#[derive(Debug, Clone, Serialize)]
pub struct Identity {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    /// Argon2 PHC string. Never leaves the process.
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

impl Identity {
    /// Create a new identity with a fresh ID.
    pub fn new(
        username: impl Into<String>,
        email: impl Into<String>,
        password_hash: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            username: username.into(),
            email: email.into(),
            password_hash: password_hash.into(),
            created_at: Utc::now(),
        }
    }
}

/// Patient profile, attached one-to-one to an identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientProfile {
    pub identity_id: Uuid,
    pub full_name: String,
    pub phone_no: String,
}

/// Doctor profile, attached one-to-one to an identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoctorProfile {
    pub id: Uuid,
    pub identity_id: Uuid,
    pub full_name: String,
    pub phone_no: String,
    /// PMDC license number.
    pub pmdc_no: String,
    /// Highest wizard step completed (0–5).
    pub registration_step: i64,
    /// Media reference of the uploaded picture.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_picture: Option<String>,
    /// Set by administrators once the license has been checked.
    pub is_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DoctorProfile {
    /// Create the profile written at the end of wizard step 1.
    pub fn new(
        identity_id: Uuid,
        full_name: impl Into<String>,
        phone_no: impl Into<String>,
        pmdc_no: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            identity_id,
            full_name: full_name.into(),
            phone_no: phone_no.into(),
            pmdc_no: pmdc_no.into(),
            registration_step: 1,
            profile_picture: None,
            is_verified: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether all five wizard steps are done.
    pub fn is_complete(&self) -> bool {
        self.registration_step >= 5
    }
}

/// One specialization label owned by a doctor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Specialization {
    pub id: Uuid,
    pub doctor_id: Uuid,
    pub name: String,
}

/// Physical practice details (wizard step 3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PracticeDetail {
    pub doctor_id: Uuid,
    pub hospital_name: String,
    pub address: String,
    pub city: String,
    pub consultation_fee: Decimal,
    pub years_of_experience: u32,
}

/// Online clinic details (wizard step 4).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnlineClinicDetail {
    pub doctor_id: Uuid,
    pub consultation_fee: Decimal,
    pub available_days: Vec<Weekday>,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub slot_minutes: u32,
}

/// Which kind of profile an identity carries, resolved once per lookup.
#[derive(Debug, Clone)]
pub enum ProfileKind {
    Patient(PatientProfile),
    Doctor(DoctorProfile),
    None,
}

/// A login session.
#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub identity_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// Whether the session is past its expiry.
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}
