//! libSQL backend for the async `Database` trait.
//!
//! Supports local file and in-memory databases. A single connection is shared
//! by all callers, so every statement runs behind `lock`. One caller's
//! transaction never absorbs another caller's statements, and reads never see
//! uncommitted writes.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, Utc, Weekday};
use libsql::{Connection, Database as LibSqlDatabase, Transaction, params};
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::accounts::{
    DoctorProfile, Identity, OnlineClinicDetail, PatientProfile, PracticeDetail, Session,
    Specialization,
};
use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::Database;

/// libSQL database backend.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
    lock: Mutex<()>,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db)?;
        backend.init_schema().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let backend = Self::from_database(db)?;
        backend.init_schema().await?;
        Ok(backend)
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            db: Arc::new(db),
            conn,
            lock: Mutex::new(()),
        })
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Begin a transaction on the shared connection.
    async fn begin(&self, op: &str) -> Result<Transaction, DatabaseError> {
        self.conn()
            .transaction()
            .await
            .map_err(|e| DatabaseError::Query(format!("{op} begin: {e}")))
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Commit on success, roll back on failure.
async fn finish_tx<T>(
    tx: Transaction,
    result: Result<T, DatabaseError>,
    op: &str,
) -> Result<T, DatabaseError> {
    match result {
        Ok(value) => {
            tx.commit()
                .await
                .map_err(|e| DatabaseError::Query(format!("{op} commit: {e}")))?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback) = tx.rollback().await {
                warn!(op, error = %rollback, "Rollback failed");
            }
            Err(e)
        }
    }
}

/// Map a libsql error, surfacing UNIQUE/FOREIGN KEY failures as constraint violations.
fn query_error(op: &str, e: libsql::Error) -> DatabaseError {
    let message = e.to_string();
    if message.contains("UNIQUE constraint failed")
        || message.contains("FOREIGN KEY constraint failed")
    {
        DatabaseError::Constraint(format!("{op}: {message}"))
    } else {
        DatabaseError::Query(format!("{op}: {message}"))
    }
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_uuid(s: &str, column: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(s)
        .map_err(|e| DatabaseError::Serialization(format!("{column} is not a UUID: {e}")))
}

fn parse_decimal(s: &str, column: &str) -> Result<Decimal, DatabaseError> {
    Decimal::from_str(s)
        .map_err(|e| DatabaseError::Serialization(format!("{column} is not a decimal: {e}")))
}

fn parse_time(s: &str, column: &str) -> Result<NaiveTime, DatabaseError> {
    NaiveTime::parse_from_str(s, TIME_FORMAT)
        .map_err(|e| DatabaseError::Serialization(format!("{column} is not a time: {e}")))
}

/// Weekdays are stored as a comma-separated list of short names ("Mon,Wed").
fn days_to_str(days: &[Weekday]) -> String {
    days.iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn str_to_days(s: &str) -> Result<Vec<Weekday>, DatabaseError> {
    s.split(',')
        .filter(|d| !d.is_empty())
        .map(|d| {
            d.parse::<Weekday>()
                .map_err(|_| DatabaseError::Serialization(format!("invalid weekday: {d}")))
        })
        .collect()
}

/// Convert `Option<String>` to libsql Value.
fn opt_text_owned(s: Option<String>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s),
        None => libsql::Value::Null,
    }
}

fn text(row: &libsql::Row, idx: i32, op: &str) -> Result<String, DatabaseError> {
    row.get::<String>(idx)
        .map_err(|e| DatabaseError::Query(format!("{op} column {idx}: {e}")))
}

fn int(row: &libsql::Row, idx: i32, op: &str) -> Result<i64, DatabaseError> {
    row.get::<i64>(idx)
        .map_err(|e| DatabaseError::Query(format!("{op} column {idx}: {e}")))
}

/// Column order matches IDENTITY_COLUMNS.
fn row_to_identity(row: &libsql::Row) -> Result<Identity, DatabaseError> {
    let op = "row_to_identity";
    let id = text(row, 0, op)?;
    let created = text(row, 4, op)?;
    Ok(Identity {
        id: parse_uuid(&id, "identities.id")?,
        username: text(row, 1, op)?,
        email: text(row, 2, op)?,
        password_hash: text(row, 3, op)?,
        created_at: parse_datetime(&created),
    })
}

/// Column order matches DOCTOR_COLUMNS.
fn row_to_doctor(row: &libsql::Row) -> Result<DoctorProfile, DatabaseError> {
    let op = "row_to_doctor";
    let id = text(row, 0, op)?;
    let identity_id = text(row, 1, op)?;
    let is_verified = int(row, 7, op)?;
    let created = text(row, 8, op)?;
    let updated = text(row, 9, op)?;
    Ok(DoctorProfile {
        id: parse_uuid(&id, "doctor_profiles.id")?,
        identity_id: parse_uuid(&identity_id, "doctor_profiles.identity_id")?,
        full_name: text(row, 2, op)?,
        phone_no: text(row, 3, op)?,
        pmdc_no: text(row, 4, op)?,
        registration_step: int(row, 5, op)?,
        profile_picture: row.get::<String>(6).ok(),
        is_verified: is_verified != 0,
        created_at: parse_datetime(&created),
        updated_at: parse_datetime(&updated),
    })
}

fn row_to_specialization(row: &libsql::Row) -> Result<Specialization, DatabaseError> {
    let op = "row_to_specialization";
    let id = text(row, 0, op)?;
    let doctor_id = text(row, 1, op)?;
    Ok(Specialization {
        id: parse_uuid(&id, "specializations.id")?,
        doctor_id: parse_uuid(&doctor_id, "specializations.doctor_id")?,
        name: text(row, 2, op)?,
    })
}

fn row_to_session(row: &libsql::Row) -> Result<Session, DatabaseError> {
    let op = "row_to_session";
    let identity_id = text(row, 1, op)?;
    let created = text(row, 2, op)?;
    let expires = text(row, 3, op)?;
    Ok(Session {
        token: text(row, 0, op)?,
        identity_id: parse_uuid(&identity_id, "sessions.identity_id")?,
        created_at: parse_datetime(&created),
        expires_at: parse_datetime(&expires),
    })
}

/// Raise `registration_step` to at least `step` inside an open transaction.
async fn advance_step(
    conn: &Connection,
    doctor_id: Uuid,
    step: i64,
    op: &str,
) -> Result<(), DatabaseError> {
    let now = Utc::now().to_rfc3339();
    let updated = conn
        .execute(
            "UPDATE doctor_profiles SET registration_step = MAX(registration_step, ?1), updated_at = ?2 WHERE id = ?3",
            params![step, now, doctor_id.to_string()],
        )
        .await
        .map_err(|e| query_error(op, e))?;
    if updated == 0 {
        return Err(DatabaseError::NotFound {
            entity: "doctor_profile".into(),
            id: doctor_id.to_string(),
        });
    }
    Ok(())
}

async fn insert_identity(conn: &Connection, identity: &Identity, op: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO identities (id, username, email, password_hash, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            identity.id.to_string(),
            identity.username.as_str(),
            identity.email.as_str(),
            identity.password_hash.as_str(),
            identity.created_at.to_rfc3339(),
        ],
    )
    .await
    .map_err(|e| query_error(op, e))?;
    Ok(())
}

// ── Trait implementation ────────────────────────────────────────────

const TIME_FORMAT: &str = "%H:%M";

const IDENTITY_COLUMNS: &str = "id, username, email, password_hash, created_at";

const DOCTOR_COLUMNS: &str = "id, identity_id, full_name, phone_no, pmdc_no, registration_step, profile_picture, is_verified, created_at, updated_at";

#[async_trait]
impl Database for LibSqlBackend {
    async fn init_schema(&self) -> Result<(), DatabaseError> {
        self.conn()
            .execute("PRAGMA foreign_keys = ON", ())
            .await
            .map_err(|e| DatabaseError::Pool(format!("enable foreign keys: {e}")))?;
        migrations::run_migrations(self.conn()).await
    }

    // ── Identities ──────────────────────────────────────────────────

    async fn get_identity(&self, id: Uuid) -> Result<Option<Identity>, DatabaseError> {
        let _guard = self.lock.lock().await;
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {IDENTITY_COLUMNS} FROM identities WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_identity: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_identity(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_identity: {e}"))),
        }
    }

    async fn get_identity_by_username(
        &self,
        username: &str,
    ) -> Result<Option<Identity>, DatabaseError> {
        let _guard = self.lock.lock().await;
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {IDENTITY_COLUMNS} FROM identities WHERE username = ?1"),
                params![username],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_identity_by_username: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_identity(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_identity_by_username: {e}"))),
        }
    }

    // ── Registration ────────────────────────────────────────────────

    async fn create_patient_account(
        &self,
        identity: &Identity,
        profile: &PatientProfile,
    ) -> Result<(), DatabaseError> {
        let op = "create_patient_account";
        let _guard = self.lock.lock().await;
        let tx = self.begin(op).await?;

        let result = async {
            insert_identity(&tx, identity, op).await?;
            tx.execute(
                "INSERT INTO patient_profiles (identity_id, full_name, phone_no) VALUES (?1, ?2, ?3)",
                params![
                    profile.identity_id.to_string(),
                    profile.full_name.as_str(),
                    profile.phone_no.as_str(),
                ],
            )
            .await
            .map_err(|e| query_error(op, e))?;
            Ok::<(), DatabaseError>(())
        }
        .await;

        finish_tx(tx, result, op).await?;
        debug!(identity_id = %identity.id, "Patient account created");
        Ok(())
    }

    async fn create_doctor_account(
        &self,
        identity: &Identity,
        profile: &DoctorProfile,
    ) -> Result<(), DatabaseError> {
        let op = "create_doctor_account";
        let _guard = self.lock.lock().await;
        let tx = self.begin(op).await?;

        let result = async {
            insert_identity(&tx, identity, op).await?;
            tx.execute(
                "INSERT INTO doctor_profiles (id, identity_id, full_name, phone_no, pmdc_no, registration_step, profile_picture, is_verified, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    profile.id.to_string(),
                    profile.identity_id.to_string(),
                    profile.full_name.as_str(),
                    profile.phone_no.as_str(),
                    profile.pmdc_no.as_str(),
                    profile.registration_step,
                    opt_text_owned(profile.profile_picture.clone()),
                    profile.is_verified as i64,
                    profile.created_at.to_rfc3339(),
                    profile.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| query_error(op, e))?;
            Ok::<(), DatabaseError>(())
        }
        .await;

        finish_tx(tx, result, op).await?;
        debug!(identity_id = %identity.id, doctor_id = %profile.id, "Doctor account created");
        Ok(())
    }

    async fn replace_specializations(
        &self,
        doctor_id: Uuid,
        names: &[String],
        step: i64,
    ) -> Result<Vec<Specialization>, DatabaseError> {
        let op = "replace_specializations";
        let _guard = self.lock.lock().await;
        let tx = self.begin(op).await?;

        let result = async {
            tx.execute(
                "DELETE FROM specializations WHERE doctor_id = ?1",
                params![doctor_id.to_string()],
            )
            .await
            .map_err(|e| query_error(op, e))?;

            let mut created = Vec::with_capacity(names.len());
            for (position, name) in names.iter().enumerate() {
                let spec = Specialization {
                    id: Uuid::new_v4(),
                    doctor_id,
                    name: name.clone(),
                };
                tx.execute(
                    "INSERT INTO specializations (id, doctor_id, name, position) VALUES (?1, ?2, ?3, ?4)",
                    params![
                        spec.id.to_string(),
                        doctor_id.to_string(),
                        spec.name.as_str(),
                        position as i64,
                    ],
                )
                .await
                .map_err(|e| query_error(op, e))?;
                created.push(spec);
            }

            advance_step(&tx, doctor_id, step, op).await?;
            Ok::<_, DatabaseError>(created)
        }
        .await;

        let created = finish_tx(tx, result, op).await?;
        debug!(doctor_id = %doctor_id, count = created.len(), "Specializations replaced");
        Ok(created)
    }

    async fn save_practice_detail(
        &self,
        detail: &PracticeDetail,
        step: i64,
    ) -> Result<(), DatabaseError> {
        let op = "save_practice_detail";
        let _guard = self.lock.lock().await;
        let tx = self.begin(op).await?;

        let result = async {
            tx.execute(
                "INSERT INTO practice_details (doctor_id, hospital_name, address, city, consultation_fee, years_of_experience)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT (doctor_id) DO UPDATE SET
                    hospital_name = ?2, address = ?3, city = ?4, consultation_fee = ?5, years_of_experience = ?6",
                params![
                    detail.doctor_id.to_string(),
                    detail.hospital_name.as_str(),
                    detail.address.as_str(),
                    detail.city.as_str(),
                    detail.consultation_fee.to_string(),
                    detail.years_of_experience as i64,
                ],
            )
            .await
            .map_err(|e| query_error(op, e))?;
            advance_step(&tx, detail.doctor_id, step, op).await
        }
        .await;

        finish_tx(tx, result, op).await?;
        debug!(doctor_id = %detail.doctor_id, "Practice details saved");
        Ok(())
    }

    async fn save_online_clinic(
        &self,
        detail: &OnlineClinicDetail,
        step: i64,
    ) -> Result<(), DatabaseError> {
        let op = "save_online_clinic";
        let _guard = self.lock.lock().await;
        let tx = self.begin(op).await?;

        let result = async {
            tx.execute(
                "INSERT INTO online_clinic_details (doctor_id, consultation_fee, available_days, start_time, end_time, slot_minutes)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT (doctor_id) DO UPDATE SET
                    consultation_fee = ?2, available_days = ?3, start_time = ?4, end_time = ?5, slot_minutes = ?6",
                params![
                    detail.doctor_id.to_string(),
                    detail.consultation_fee.to_string(),
                    days_to_str(&detail.available_days),
                    detail.start_time.format(TIME_FORMAT).to_string(),
                    detail.end_time.format(TIME_FORMAT).to_string(),
                    detail.slot_minutes as i64,
                ],
            )
            .await
            .map_err(|e| query_error(op, e))?;
            advance_step(&tx, detail.doctor_id, step, op).await
        }
        .await;

        finish_tx(tx, result, op).await?;
        debug!(doctor_id = %detail.doctor_id, "Online clinic details saved");
        Ok(())
    }

    async fn set_profile_picture(
        &self,
        doctor_id: Uuid,
        reference: &str,
        step: i64,
    ) -> Result<(), DatabaseError> {
        let op = "set_profile_picture";
        let _guard = self.lock.lock().await;
        let tx = self.begin(op).await?;

        let result = async {
            tx.execute(
                "UPDATE doctor_profiles SET profile_picture = ?1 WHERE id = ?2",
                params![reference, doctor_id.to_string()],
            )
            .await
            .map_err(|e| query_error(op, e))?;
            advance_step(&tx, doctor_id, step, op).await
        }
        .await;

        finish_tx(tx, result, op).await?;
        debug!(doctor_id = %doctor_id, reference, "Profile picture stored");
        Ok(())
    }

    // ── Profiles ────────────────────────────────────────────────────

    async fn get_patient_profile(
        &self,
        identity_id: Uuid,
    ) -> Result<Option<PatientProfile>, DatabaseError> {
        let _guard = self.lock.lock().await;
        let op = "get_patient_profile";
        let mut rows = self
            .conn()
            .query(
                "SELECT identity_id, full_name, phone_no FROM patient_profiles WHERE identity_id = ?1",
                params![identity_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(PatientProfile {
                identity_id,
                full_name: text(&row, 1, op)?,
                phone_no: text(&row, 2, op)?,
            })),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("{op}: {e}"))),
        }
    }

    async fn get_doctor_profile(
        &self,
        identity_id: Uuid,
    ) -> Result<Option<DoctorProfile>, DatabaseError> {
        let _guard = self.lock.lock().await;
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {DOCTOR_COLUMNS} FROM doctor_profiles WHERE identity_id = ?1"),
                params![identity_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_doctor_profile: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_doctor(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_doctor_profile: {e}"))),
        }
    }

    async fn list_specializations(
        &self,
        doctor_id: Uuid,
    ) -> Result<Vec<Specialization>, DatabaseError> {
        let _guard = self.lock.lock().await;
        let mut rows = self
            .conn()
            .query(
                "SELECT id, doctor_id, name FROM specializations WHERE doctor_id = ?1 ORDER BY position ASC",
                params![doctor_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_specializations: {e}")))?;

        let mut specs = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_specializations: {e}")))?
        {
            specs.push(row_to_specialization(&row)?);
        }
        Ok(specs)
    }

    async fn get_practice_detail(
        &self,
        doctor_id: Uuid,
    ) -> Result<Option<PracticeDetail>, DatabaseError> {
        let _guard = self.lock.lock().await;
        let op = "get_practice_detail";
        let mut rows = self
            .conn()
            .query(
                "SELECT hospital_name, address, city, consultation_fee, years_of_experience FROM practice_details WHERE doctor_id = ?1",
                params![doctor_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let fee = text(&row, 3, op)?;
                let years = int(&row, 4, op)?;
                Ok(Some(PracticeDetail {
                    doctor_id,
                    hospital_name: text(&row, 0, op)?,
                    address: text(&row, 1, op)?,
                    city: text(&row, 2, op)?,
                    consultation_fee: parse_decimal(&fee, "practice_details.consultation_fee")?,
                    years_of_experience: u32::try_from(years).map_err(|e| {
                        DatabaseError::Serialization(format!("years_of_experience: {e}"))
                    })?,
                }))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("{op}: {e}"))),
        }
    }

    async fn get_online_clinic(
        &self,
        doctor_id: Uuid,
    ) -> Result<Option<OnlineClinicDetail>, DatabaseError> {
        let _guard = self.lock.lock().await;
        let op = "get_online_clinic";
        let mut rows = self
            .conn()
            .query(
                "SELECT consultation_fee, available_days, start_time, end_time, slot_minutes FROM online_clinic_details WHERE doctor_id = ?1",
                params![doctor_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let fee = text(&row, 0, op)?;
                let days = text(&row, 1, op)?;
                let start = text(&row, 2, op)?;
                let end = text(&row, 3, op)?;
                let slot = int(&row, 4, op)?;
                Ok(Some(OnlineClinicDetail {
                    doctor_id,
                    consultation_fee: parse_decimal(&fee, "online_clinic_details.consultation_fee")?,
                    available_days: str_to_days(&days)?,
                    start_time: parse_time(&start, "online_clinic_details.start_time")?,
                    end_time: parse_time(&end, "online_clinic_details.end_time")?,
                    slot_minutes: u32::try_from(slot)
                        .map_err(|e| DatabaseError::Serialization(format!("slot_minutes: {e}")))?,
                }))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("{op}: {e}"))),
        }
    }

    // ── Sessions ────────────────────────────────────────────────────

    async fn create_session(&self, session: &Session) -> Result<(), DatabaseError> {
        let _guard = self.lock.lock().await;
        self.conn()
            .execute(
                "INSERT INTO sessions (token, identity_id, created_at, expires_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    session.token.as_str(),
                    session.identity_id.to_string(),
                    session.created_at.to_rfc3339(),
                    session.expires_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| query_error("create_session", e))?;
        Ok(())
    }

    async fn get_session(&self, token: &str) -> Result<Option<Session>, DatabaseError> {
        let _guard = self.lock.lock().await;
        let mut rows = self
            .conn()
            .query(
                "SELECT token, identity_id, created_at, expires_at FROM sessions WHERE token = ?1",
                params![token],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_session: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_session(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_session: {e}"))),
        }
    }

    async fn delete_session(&self, token: &str) -> Result<bool, DatabaseError> {
        let _guard = self.lock.lock().await;
        let count = self
            .conn()
            .execute("DELETE FROM sessions WHERE token = ?1", params![token])
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_session: {e}")))?;
        Ok(count > 0)
    }

    async fn purge_expired_sessions(&self) -> Result<usize, DatabaseError> {
        let _guard = self.lock.lock().await;
        let now = Utc::now().to_rfc3339();
        let count = self
            .conn()
            .execute("DELETE FROM sessions WHERE expires_at <= ?1", params![now])
            .await
            .map_err(|e| DatabaseError::Query(format!("purge_expired_sessions: {e}")))?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    async fn test_db() -> LibSqlBackend {
        LibSqlBackend::new_memory().await.unwrap()
    }

    async fn make_doctor(db: &LibSqlBackend, username: &str) -> DoctorProfile {
        let identity = Identity::new(username, format!("{username}@example.com"), "hash");
        let profile = DoctorProfile::new(identity.id, "Dr. Test", "03001234567", "PMDC-42");
        db.create_doctor_account(&identity, &profile).await.unwrap();
        profile
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    // ── Account tests ───────────────────────────────────────────────

    #[tokio::test]
    async fn create_patient_and_lookup() {
        let db = test_db().await;
        let identity = Identity::new("amna", "amna@example.com", "hash");
        let profile = PatientProfile {
            identity_id: identity.id,
            full_name: "Amna Riaz".into(),
            phone_no: "03211234567".into(),
        };
        db.create_patient_account(&identity, &profile).await.unwrap();

        let fetched = db.get_identity_by_username("amna").await.unwrap().unwrap();
        assert_eq!(fetched.id, identity.id);
        assert_eq!(fetched.password_hash, "hash");

        let by_id = db.get_identity(identity.id).await.unwrap().unwrap();
        assert_eq!(by_id.email, "amna@example.com");

        let patient = db.get_patient_profile(identity.id).await.unwrap().unwrap();
        assert_eq!(patient, profile);
        assert!(db.get_doctor_profile(identity.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_username_is_constraint_error_and_rolls_back() {
        let db = test_db().await;
        make_doctor(&db, "dup").await;

        let identity = Identity::new("dup", "other@example.com", "hash");
        let profile = PatientProfile {
            identity_id: identity.id,
            full_name: "Other".into(),
            phone_no: "0300".into(),
        };
        let err = db.create_patient_account(&identity, &profile).await.unwrap_err();
        assert!(matches!(err, DatabaseError::Constraint(_)), "got {err:?}");
        assert!(db.get_patient_profile(identity.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn doctor_profile_roundtrip() {
        let db = test_db().await;
        let profile = make_doctor(&db, "doc").await;

        let fetched = db.get_doctor_profile(profile.identity_id).await.unwrap().unwrap();
        assert_eq!(fetched.id, profile.id);
        assert_eq!(fetched.pmdc_no, "PMDC-42");
        assert_eq!(fetched.registration_step, 1);
        assert!(fetched.profile_picture.is_none());
        assert!(!fetched.is_verified);
    }

    #[tokio::test]
    async fn profile_kind_resolution() {
        let db = test_db().await;
        let doctor = make_doctor(&db, "kind_doc").await;
        assert!(matches!(
            db.get_profile_kind(doctor.identity_id).await.unwrap(),
            crate::accounts::ProfileKind::Doctor(p) if p.id == doctor.id
        ));
        assert!(matches!(
            db.get_profile_kind(Uuid::new_v4()).await.unwrap(),
            crate::accounts::ProfileKind::None
        ));
    }

    // ── Wizard step tests ───────────────────────────────────────────

    #[tokio::test]
    async fn replace_specializations_advances_and_replaces() {
        let db = test_db().await;
        let doctor = make_doctor(&db, "spec").await;

        let created = db
            .replace_specializations(doctor.id, &names(&["Cardiology", "Neurology"]), 2)
            .await
            .unwrap();
        assert_eq!(created.len(), 2);

        let again = db
            .replace_specializations(doctor.id, &names(&["Pediatrics"]), 2)
            .await
            .unwrap();
        assert_eq!(again.len(), 1);

        let listed = db.list_specializations(doctor.id).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "Pediatrics");

        let fetched = db.get_doctor_profile(doctor.identity_id).await.unwrap().unwrap();
        assert_eq!(fetched.registration_step, 2);
    }

    #[tokio::test]
    async fn specializations_keep_submission_order() {
        let db = test_db().await;
        let doctor = make_doctor(&db, "order").await;
        db.replace_specializations(doctor.id, &names(&["Zoology", "Anatomy", "Zoology"]), 2)
            .await
            .unwrap();
        let listed: Vec<String> = db
            .list_specializations(doctor.id)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(listed, names(&["Zoology", "Anatomy", "Zoology"]));
    }

    #[tokio::test]
    async fn reads_wait_for_open_transactions() {
        let db = Arc::new(test_db().await);
        let doctor = make_doctor(&db, "drwait").await;

        let guard = db.lock.lock().await;
        let tx = db.begin("test").await.unwrap();
        tx.execute(
            "UPDATE doctor_profiles SET registration_step = 3 WHERE id = ?1",
            params![doctor.id.to_string()],
        )
        .await
        .unwrap();

        let reader = {
            let db = db.clone();
            tokio::spawn(async move { db.get_doctor_profile(doctor.identity_id).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!reader.is_finished());

        tx.rollback().await.unwrap();
        drop(guard);

        let profile = reader.await.unwrap().unwrap().unwrap();
        assert_eq!(profile.registration_step, 1);
    }

    #[tokio::test]
    async fn step_never_decreases() {
        let db = test_db().await;
        let doctor = make_doctor(&db, "mono").await;
        db.set_profile_picture(doctor.id, "profile_pictures/a.png", 5)
            .await
            .unwrap();
        db.replace_specializations(doctor.id, &names(&["Cardiology"]), 2)
            .await
            .unwrap();

        let fetched = db.get_doctor_profile(doctor.identity_id).await.unwrap().unwrap();
        assert_eq!(fetched.registration_step, 5);
        assert_eq!(fetched.profile_picture.as_deref(), Some("profile_pictures/a.png"));
    }

    #[tokio::test]
    async fn advancing_unknown_doctor_is_not_found_and_rolls_back() {
        let db = test_db().await;
        let ghost = Uuid::new_v4();
        let err = db.set_profile_picture(ghost, "x.png", 5).await.unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn practice_detail_upsert() {
        let db = test_db().await;
        let doctor = make_doctor(&db, "practice").await;
        let mut detail = PracticeDetail {
            doctor_id: doctor.id,
            hospital_name: "Shifa International".into(),
            address: "H-8/4".into(),
            city: "Islamabad".into(),
            consultation_fee: dec!(2500.00),
            years_of_experience: 7,
        };
        db.save_practice_detail(&detail, 3).await.unwrap();

        detail.city = "Rawalpindi".into();
        db.save_practice_detail(&detail, 3).await.unwrap();

        let fetched = db.get_practice_detail(doctor.id).await.unwrap().unwrap();
        assert_eq!(fetched, detail);
        let profile = db.get_doctor_profile(doctor.identity_id).await.unwrap().unwrap();
        assert_eq!(profile.registration_step, 3);
    }

    #[tokio::test]
    async fn online_clinic_roundtrip() {
        let db = test_db().await;
        let doctor = make_doctor(&db, "online").await;
        let detail = OnlineClinicDetail {
            doctor_id: doctor.id,
            consultation_fee: dec!(1500),
            available_days: vec![Weekday::Mon, Weekday::Wed, Weekday::Sat],
            start_time: NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(21, 30, 0).unwrap(),
            slot_minutes: 20,
        };
        db.save_online_clinic(&detail, 4).await.unwrap();

        let fetched = db.get_online_clinic(doctor.id).await.unwrap().unwrap();
        assert_eq!(fetched, detail);
        assert!(db.get_online_clinic(Uuid::new_v4()).await.unwrap().is_none());
    }

    // ── Session tests ───────────────────────────────────────────────

    #[tokio::test]
    async fn session_crud_and_purge() {
        let db = test_db().await;
        let doctor = make_doctor(&db, "sess").await;
        let now = Utc::now();

        let live = Session {
            token: "live-token".into(),
            identity_id: doctor.identity_id,
            created_at: now,
            expires_at: now + chrono::Duration::hours(1),
        };
        let stale = Session {
            token: "stale-token".into(),
            identity_id: doctor.identity_id,
            created_at: now - chrono::Duration::hours(2),
            expires_at: now - chrono::Duration::hours(1),
        };
        db.create_session(&live).await.unwrap();
        db.create_session(&stale).await.unwrap();

        let fetched = db.get_session("live-token").await.unwrap().unwrap();
        assert_eq!(fetched.identity_id, doctor.identity_id);

        assert_eq!(db.purge_expired_sessions().await.unwrap(), 1);
        assert!(db.get_session("stale-token").await.unwrap().is_none());

        assert!(db.delete_session("live-token").await.unwrap());
        assert!(!db.delete_session("live-token").await.unwrap());
    }

    #[tokio::test]
    async fn session_requires_existing_identity() {
        let db = test_db().await;
        let now = Utc::now();
        let orphan = Session {
            token: "orphan".into(),
            identity_id: Uuid::new_v4(),
            created_at: now,
            expires_at: now + chrono::Duration::hours(1),
        };
        let err = db.create_session(&orphan).await.unwrap_err();
        assert!(matches!(err, DatabaseError::Constraint(_)), "got {err:?}");
    }
}
