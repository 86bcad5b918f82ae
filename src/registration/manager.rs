//! RegistrationManager drives patient sign-up and the doctor wizard.
//!
//! The manager decides what a request should produce: a form (blank or with
//! errors) or a redirect. HTTP concerns such as cookies stay in the routes.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::accounts::{DoctorProfile, Identity, PatientProfile};
use crate::auth::password::hash_password_blocking;
use crate::error::{DatabaseError, Result};
use crate::media::MediaStore;
use crate::navigation::Route;
use crate::store::Database;

use super::forms::{
    DoctorAccountForm, FormErrors, NewAccount, OnlineClinicForm, PatientRegistrationForm,
    PracticeDetailsForm, ProfilePictureForm, SpecializationsForm,
};
use super::state::{Gate, RegistrationState, WizardStep};

pub const PATIENT_REGISTERED: &str = "Registration successful. Please login.";
pub const REGISTRATION_COMPLETE: &str =
    "Registration complete. Please wait for admin verification.";
const USERNAME_TAKEN: &str = "A user with that username already exists.";

/// What a registration request resolves to.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// Render the form for `route`; errors are empty for a blank form.
    Form {
        route: Route,
        errors: FormErrors,
        values: serde_json::Value,
    },
    /// Redirect elsewhere.
    Redirect {
        to: Route,
        notice: Option<&'static str>,
        /// Identity the caller should start a session for.
        login: Option<Uuid>,
    },
}

impl StepOutcome {
    fn blank(route: Route) -> Self {
        Self::Form {
            route,
            errors: FormErrors::new(),
            values: serde_json::json!({}),
        }
    }

    fn invalid(route: Route, errors: FormErrors, values: serde_json::Value) -> Self {
        Self::Form {
            route,
            errors,
            values,
        }
    }

    fn redirect(to: Route) -> Self {
        Self::Redirect {
            to,
            notice: None,
            login: None,
        }
    }
}

/// A form submitted to one of the wizard steps.
#[derive(Debug)]
pub enum StepSubmission {
    Account(DoctorAccountForm),
    Specializations(SpecializationsForm),
    Practice(PracticeDetailsForm),
    OnlineClinic(OnlineClinicForm),
    ProfilePicture(ProfilePictureForm),
}

impl StepSubmission {
    pub fn step(&self) -> WizardStep {
        match self {
            Self::Account(_) => WizardStep::Account,
            Self::Specializations(_) => WizardStep::Specializations,
            Self::Practice(_) => WizardStep::Practice,
            Self::OnlineClinic(_) => WizardStep::OnlineClinic,
            Self::ProfilePicture(_) => WizardStep::ProfilePicture,
        }
    }
}

/// A request against a wizard step: show it, or submit it.
#[derive(Debug)]
pub enum StepRequest {
    View(WizardStep),
    Submit(StepSubmission),
}

impl StepRequest {
    pub fn step(&self) -> WizardStep {
        match self {
            Self::View(step) => *step,
            Self::Submit(submission) => submission.step(),
        }
    }
}

/// Per-identity locks held across a step's gate check and its writes.
#[derive(Default)]
struct StepLocks {
    inner: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl StepLocks {
    async fn acquire(&self, identity_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            // Drop locks nobody is holding.
            map.retain(|_, lock| Arc::strong_count(lock) > 1);
            map.entry(identity_id).or_default().clone()
        };
        lock.lock_owned().await
    }
}

/// Coordinates registration: validation, gating, and persistence.
pub struct RegistrationManager {
    db: Arc<dyn Database>,
    media: Arc<MediaStore>,
    max_upload_bytes: usize,
    locks: StepLocks,
}

impl RegistrationManager {
    pub fn new(db: Arc<dyn Database>, media: Arc<MediaStore>, max_upload_bytes: usize) -> Self {
        Self {
            db,
            media,
            max_upload_bytes,
            locks: StepLocks::default(),
        }
    }

    // ── Patients ────────────────────────────────────────────────────

    /// Show (`None`) or submit the patient registration form.
    pub async fn register_patient(
        &self,
        submission: Option<PatientRegistrationForm>,
    ) -> Result<StepOutcome> {
        let route = Route::PatientRegister;
        let Some(form) = submission else {
            return Ok(StepOutcome::blank(route));
        };

        let values = form.values();
        let account = match form.validate() {
            Ok(account) => account,
            Err(errors) => return Ok(StepOutcome::invalid(route, errors, values)),
        };
        if let Some(errors) = self.username_taken(&account.username).await? {
            return Ok(StepOutcome::invalid(route, errors, values));
        }

        let NewAccount {
            username,
            email,
            password,
            full_name,
            phone_no,
        } = account;
        let hash = hash_password_blocking(password).await?;
        let identity = Identity::new(username, email, hash);
        let profile = PatientProfile {
            identity_id: identity.id,
            full_name,
            phone_no,
        };

        match self.db.create_patient_account(&identity, &profile).await {
            Ok(()) => {}
            Err(DatabaseError::Constraint(_)) => {
                return Ok(StepOutcome::invalid(route, username_taken_errors(), values));
            }
            Err(e) => return Err(e.into()),
        }

        info!(identity_id = %identity.id, username = %identity.username, "Patient registered");
        Ok(StepOutcome::Redirect {
            to: Route::Login,
            notice: Some(PATIENT_REGISTERED),
            login: None,
        })
    }

    // ── Doctor wizard ───────────────────────────────────────────────

    /// Enter a doctor wizard step.
    ///
    /// Step 1 needs no identity. Steps 2–5 need one and are gated on the
    /// stored `registration_step`.
    pub async fn enter_step(
        &self,
        identity: Option<&Identity>,
        request: StepRequest,
    ) -> Result<StepOutcome> {
        match request {
            StepRequest::View(WizardStep::Account) => {
                Ok(StepOutcome::blank(Route::DoctorStep(WizardStep::Account)))
            }
            StepRequest::Submit(StepSubmission::Account(form)) => self.submit_account(form).await,
            request => match identity {
                Some(identity) => self.enter_gated_step(identity, request).await,
                None => Ok(StepOutcome::redirect(Route::Login)),
            },
        }
    }

    async fn submit_account(&self, form: DoctorAccountForm) -> Result<StepOutcome> {
        let route = Route::DoctorStep(WizardStep::Account);
        let values = form.values();
        let doctor = match form.validate() {
            Ok(doctor) => doctor,
            Err(errors) => return Ok(StepOutcome::invalid(route, errors, values)),
        };
        if let Some(errors) = self.username_taken(&doctor.account.username).await? {
            return Ok(StepOutcome::invalid(route, errors, values));
        }

        let NewAccount {
            username,
            email,
            password,
            full_name,
            phone_no,
        } = doctor.account;
        let hash = hash_password_blocking(password).await?;
        let identity = Identity::new(username, email, hash);
        let profile = DoctorProfile::new(identity.id, full_name, phone_no, doctor.pmdc_no);

        match self.db.create_doctor_account(&identity, &profile).await {
            Ok(()) => {}
            Err(DatabaseError::Constraint(_)) => {
                return Ok(StepOutcome::invalid(route, username_taken_errors(), values));
            }
            Err(e) => return Err(e.into()),
        }

        info!(
            identity_id = %identity.id,
            doctor_id = %profile.id,
            step = 1,
            "Doctor account created"
        );
        Ok(StepOutcome::Redirect {
            to: Route::DoctorStep(WizardStep::Specializations),
            notice: None,
            login: Some(identity.id),
        })
    }

    async fn enter_gated_step(
        &self,
        identity: &Identity,
        request: StepRequest,
    ) -> Result<StepOutcome> {
        let step = request.step();
        let _guard = self.locks.acquire(identity.id).await;

        let profile = self.db.get_doctor_profile(identity.id).await?;
        let state = RegistrationState::for_profile(profile.as_ref());
        if let Gate::Redirect(target) = state.gate(step) {
            debug!(
                identity_id = %identity.id,
                requested = step.index(),
                redirect_to = target.index(),
                "Out-of-sequence wizard access"
            );
            return Ok(StepOutcome::redirect(Route::DoctorStep(target)));
        }
        let Some(profile) = profile else {
            return Ok(StepOutcome::redirect(Route::DoctorStep(WizardStep::Account)));
        };

        let submission = match request {
            StepRequest::View(step) => return Ok(StepOutcome::blank(Route::DoctorStep(step))),
            StepRequest::Submit(submission) => submission,
        };

        let route = Route::DoctorStep(step);
        let cursor = state.next(step).completed_steps();

        match submission {
            StepSubmission::Specializations(form) => {
                let values = form.values();
                let names = match form.validate() {
                    Ok(names) => names,
                    Err(errors) => return Ok(StepOutcome::invalid(route, errors, values)),
                };
                let saved = self
                    .db
                    .replace_specializations(profile.id, &names, cursor)
                    .await?;
                info!(doctor_id = %profile.id, step = 2, count = saved.len(), "Specializations saved");
            }
            StepSubmission::Practice(form) => {
                let values = form.values();
                let detail = match form.validate(profile.id) {
                    Ok(detail) => detail,
                    Err(errors) => return Ok(StepOutcome::invalid(route, errors, values)),
                };
                self.db.save_practice_detail(&detail, cursor).await?;
                info!(doctor_id = %profile.id, step = 3, city = %detail.city, "Practice details saved");
            }
            StepSubmission::OnlineClinic(form) => {
                let values = form.values();
                let detail = match form.validate(profile.id) {
                    Ok(detail) => detail,
                    Err(errors) => return Ok(StepOutcome::invalid(route, errors, values)),
                };
                self.db.save_online_clinic(&detail, cursor).await?;
                info!(doctor_id = %profile.id, step = 4, "Online clinic saved");
            }
            StepSubmission::ProfilePicture(form) => {
                let values = form.values();
                let image = match form.validate(self.max_upload_bytes) {
                    Ok(image) => image,
                    Err(errors) => return Ok(StepOutcome::invalid(route, errors, values)),
                };
                let reference = self.media.save_profile_picture(profile.id, &image).await?;
                if let Err(e) = self
                    .db
                    .set_profile_picture(profile.id, &reference, cursor)
                    .await
                {
                    if let Err(cleanup) = self.media.remove(&reference).await {
                        warn!(path = %reference, "Failed to remove orphaned picture: {cleanup}");
                    }
                    return Err(e.into());
                }
                info!(doctor_id = %profile.id, step = 5, "Doctor registration complete");
            }
            StepSubmission::Account(_) => {
                // Routed to `submit_account` before gating.
                return Ok(StepOutcome::redirect(Route::DoctorStep(WizardStep::Account)));
            }
        }

        Ok(match step.next() {
            Some(next) => StepOutcome::redirect(Route::DoctorStep(next)),
            None => StepOutcome::Redirect {
                to: Route::DoctorDashboard,
                notice: Some(REGISTRATION_COMPLETE),
                login: None,
            },
        })
    }

    async fn username_taken(&self, username: &str) -> Result<Option<FormErrors>> {
        Ok(self
            .db
            .get_identity_by_username(username)
            .await?
            .map(|_| username_taken_errors()))
    }
}

fn username_taken_errors() -> FormErrors {
    let mut errors = FormErrors::new();
    errors.add("username", USERNAME_TAKEN);
    errors
}
