//! Registration endpoints: patient sign-up and the five doctor wizard steps.

use axum::extract::multipart::MultipartError;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Form, Json, Router};

use crate::accounts::Identity;
use crate::app::{redirect, render_form, AppState};
use crate::auth::{session_cookie, set_cookie, CurrentIdentity};
use crate::error::Error;

use super::forms::{
    DoctorAccountForm, OnlineClinicForm, PatientRegistrationForm, PracticeDetailsForm,
    ProfilePictureForm, SpecializationsForm, UploadedFile,
};
use super::manager::{StepOutcome, StepRequest, StepSubmission};
use super::state::WizardStep;

/// Slack on top of the picture limit for multipart framing.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Request bodies are read and discarded up to this multiple of the picture
/// limit before the connection is refused.
const DRAIN_FACTOR: usize = 4;

/// Turn a registration outcome into a response, starting a session if asked.
async fn respond(state: &AppState, outcome: StepOutcome) -> Result<Response, Error> {
    match outcome {
        StepOutcome::Form {
            route,
            errors,
            values,
        } => Ok(render_form(route, &errors, values)),
        StepOutcome::Redirect { to, notice, login } => {
            let mut response = redirect(to.path(), notice);
            if let Some(identity_id) = login {
                let session = state.sessions.start(identity_id).await?;
                let cookie = session_cookie(&session.token, state.sessions.ttl().as_secs());
                set_cookie(&mut response, &cookie);
            }
            Ok(response)
        }
    }
}

async fn enter(
    state: &AppState,
    identity: Option<&Identity>,
    request: StepRequest,
) -> Result<Response, Error> {
    let outcome = state.registration.enter_step(identity, request).await?;
    respond(state, outcome).await
}

// ── Patients ────────────────────────────────────────────────────────

/// GET /register/patient
async fn patient_form(State(state): State<AppState>) -> Result<Response, Error> {
    let outcome = state.registration.register_patient(None).await?;
    respond(&state, outcome).await
}

/// POST /register/patient
async fn patient_submit(
    State(state): State<AppState>,
    Form(form): Form<PatientRegistrationForm>,
) -> Result<Response, Error> {
    let outcome = state.registration.register_patient(Some(form)).await?;
    respond(&state, outcome).await
}

// ── Doctor wizard ───────────────────────────────────────────────────

/// GET /register/doctor/step1
async fn step1_form(State(state): State<AppState>) -> Result<Response, Error> {
    enter(&state, None, StepRequest::View(WizardStep::Account)).await
}

/// POST /register/doctor/step1
///
/// Creates the account and logs it in.
async fn step1_submit(
    State(state): State<AppState>,
    Form(form): Form<DoctorAccountForm>,
) -> Result<Response, Error> {
    enter(&state, None, StepRequest::Submit(StepSubmission::Account(form))).await
}

async fn step2_form(
    State(state): State<AppState>,
    CurrentIdentity(identity): CurrentIdentity,
) -> Result<Response, Error> {
    enter(&state, Some(&identity), StepRequest::View(WizardStep::Specializations)).await
}

async fn step2_submit(
    State(state): State<AppState>,
    CurrentIdentity(identity): CurrentIdentity,
    Form(form): Form<SpecializationsForm>,
) -> Result<Response, Error> {
    let request = StepRequest::Submit(StepSubmission::Specializations(form));
    enter(&state, Some(&identity), request).await
}

async fn step3_form(
    State(state): State<AppState>,
    CurrentIdentity(identity): CurrentIdentity,
) -> Result<Response, Error> {
    enter(&state, Some(&identity), StepRequest::View(WizardStep::Practice)).await
}

async fn step3_submit(
    State(state): State<AppState>,
    CurrentIdentity(identity): CurrentIdentity,
    Form(form): Form<PracticeDetailsForm>,
) -> Result<Response, Error> {
    let request = StepRequest::Submit(StepSubmission::Practice(form));
    enter(&state, Some(&identity), request).await
}

async fn step4_form(
    State(state): State<AppState>,
    CurrentIdentity(identity): CurrentIdentity,
) -> Result<Response, Error> {
    enter(&state, Some(&identity), StepRequest::View(WizardStep::OnlineClinic)).await
}

async fn step4_submit(
    State(state): State<AppState>,
    CurrentIdentity(identity): CurrentIdentity,
    Form(form): Form<OnlineClinicForm>,
) -> Result<Response, Error> {
    let request = StepRequest::Submit(StepSubmission::OnlineClinic(form));
    enter(&state, Some(&identity), request).await
}

async fn step5_form(
    State(state): State<AppState>,
    CurrentIdentity(identity): CurrentIdentity,
) -> Result<Response, Error> {
    enter(&state, Some(&identity), StepRequest::View(WizardStep::ProfilePicture)).await
}

/// POST /register/doctor/step5 (multipart, field `profile_picture`)
async fn step5_submit(
    State(state): State<AppState>,
    CurrentIdentity(identity): CurrentIdentity,
    multipart: Multipart,
) -> Result<Response, Error> {
    let form = match read_picture_form(multipart, state.config.max_upload_bytes).await {
        Ok(form) => form,
        Err(e) => {
            tracing::debug!(identity_id = %identity.id, "Rejected multipart body: {e}");
            return Ok((e.status(), Json(serde_json::json!({"error": e.body_text()})))
                .into_response());
        }
    };
    let request = StepRequest::Submit(StepSubmission::ProfilePicture(form));
    enter(&state, Some(&identity), request).await
}

fn body_too_large(e: &MultipartError) -> bool {
    e.status() == StatusCode::PAYLOAD_TOO_LARGE
}

/// Read the `profile_picture` part, buffering at most `max_bytes + 1` bytes.
///
/// Anything past the limit, including a body cut off by the request limit,
/// sets `too_large` so validation can report it on the form.
async fn read_picture_form(
    mut multipart: Multipart,
    max_bytes: usize,
) -> Result<ProfilePictureForm, MultipartError> {
    let mut form = ProfilePictureForm::default();
    loop {
        let mut field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) if body_too_large(&e) => {
                form.too_large = true;
                break;
            }
            Err(e) => return Err(e),
        };
        if field.name() != Some("profile_picture") {
            continue;
        }
        let file_name = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);

        let mut bytes = Vec::new();
        loop {
            match field.chunk().await {
                Ok(Some(chunk)) => {
                    let room = max_bytes.saturating_add(1).saturating_sub(bytes.len());
                    bytes.extend_from_slice(&chunk[..chunk.len().min(room)]);
                }
                Ok(None) => break,
                Err(e) if body_too_large(&e) => {
                    form.too_large = true;
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        if bytes.len() > max_bytes {
            form.too_large = true;
        }
        form.profile_picture = Some(UploadedFile {
            file_name,
            content_type,
            bytes,
        });
    }
    Ok(form)
}

/// Build the registration routes.
pub fn registration_routes(state: AppState) -> Router {
    let upload_limit = state
        .config
        .max_upload_bytes
        .saturating_mul(DRAIN_FACTOR)
        .saturating_add(MULTIPART_OVERHEAD);
    Router::new()
        .route("/register/patient", get(patient_form).post(patient_submit))
        .route("/register/doctor/step1", get(step1_form).post(step1_submit))
        .route("/register/doctor/step2", get(step2_form).post(step2_submit))
        .route("/register/doctor/step3", get(step3_form).post(step3_submit))
        .route("/register/doctor/step4", get(step4_form).post(step4_submit))
        .route(
            "/register/doctor/step5",
            get(step5_form)
                .post(step5_submit)
                .layer(DefaultBodyLimit::max(upload_limit)),
        )
        .with_state(state)
}
