//! Dashboard endpoints.

use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use serde_json::json;

use crate::app::{redirect, render, AppState};
use crate::auth::CurrentIdentity;
use crate::error::Error;
use crate::navigation::Route;

use super::{route_dashboard, DashboardView};

/// GET /dashboard
async fn dashboard(
    State(state): State<AppState>,
    CurrentIdentity(identity): CurrentIdentity,
) -> Result<Response, Error> {
    let view = route_dashboard(state.db.as_ref(), &identity).await?;
    tracing::debug!(identity_id = %identity.id, ?view, "Dashboard routed");
    Ok(match view {
        DashboardView::Patient => render(Route::PatientDashboard, json!({})),
        DashboardView::Doctor(profile) => {
            let pending = profile.is_complete() && !profile.is_verified;
            render(
                Route::DoctorDashboard,
                json!({ "doctor_profile": profile, "pending_verification": pending }),
            )
        }
        DashboardView::Home => redirect(Route::Home.path(), None),
    })
}

/// GET /dashboard/doctor
async fn doctor_dashboard(
    State(state): State<AppState>,
    CurrentIdentity(identity): CurrentIdentity,
) -> Result<Response, Error> {
    let profile = state.db.get_doctor_profile(identity.id).await?;
    let pending = profile
        .as_ref()
        .is_some_and(|p| p.is_complete() && !p.is_verified);
    Ok(render(
        Route::DoctorDashboard,
        json!({ "doctor_profile": profile, "pending_verification": pending }),
    ))
}

/// Build the dashboard routes.
pub fn dashboard_routes(state: AppState) -> Router {
    Router::new()
        .route("/dashboard", get(dashboard))
        .route("/dashboard/doctor", get(doctor_dashboard))
        .with_state(state)
}
