//! HTTP application state and router.

use std::sync::Arc;

use axum::http::header::LOCATION;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::auth::SessionManager;
use crate::config::AppConfig;
use crate::error::Error;
use crate::media::MediaStore;
use crate::navigation::Route;
use crate::registration::{FormErrors, RegistrationManager};
use crate::store::Database;

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn Database>,
    pub sessions: Arc<SessionManager>,
    pub registration: Arc<RegistrationManager>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    /// Wire up managers around a database and media store.
    pub fn new(db: Arc<dyn Database>, media: Arc<MediaStore>, config: AppConfig) -> Self {
        let sessions = Arc::new(SessionManager::new(db.clone(), config.session_ttl));
        let registration = Arc::new(RegistrationManager::new(
            db.clone(),
            media,
            config.max_upload_bytes,
        ));
        Self {
            db,
            sessions,
            registration,
            config: Arc::new(config),
        }
    }
}

// ── Responses ───────────────────────────────────────────────────────

/// 303 redirect with a JSON body naming the target.
pub fn redirect(to: &str, notice: Option<&str>) -> Response {
    let mut body = json!({ "redirect": to });
    if let Some(notice) = notice {
        body["notice"] = json!(notice);
    }
    (StatusCode::SEE_OTHER, [(LOCATION, to.to_string())], Json(body)).into_response()
}

/// 200 view with extra context merged into the body.
pub fn render(route: Route, context: serde_json::Value) -> Response {
    let mut body = json!({ "view": route.name() });
    if let serde_json::Value::Object(extra) = context {
        if let Some(map) = body.as_object_mut() {
            map.extend(extra);
        }
    }
    (StatusCode::OK, Json(body)).into_response()
}

/// 200 form view with errors and echoed values.
pub fn render_form(route: Route, errors: &FormErrors, values: serde_json::Value) -> Response {
    render(route, json!({ "errors": errors, "values": values }))
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        tracing::error!("Request failed: {self}");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": "Internal server error"})),
        )
            .into_response()
    }
}

// ── Router ──────────────────────────────────────────────────────────

/// GET /
async fn home() -> Response {
    render(Route::Home, json!({}))
}

/// GET /health
async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok", "version": env!("CARGO_PKG_VERSION")}))
}

/// Build the full application router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/health", get(health))
        .merge(crate::auth::auth_routes(state.clone()))
        .merge(crate::registration::registration_routes(state.clone()))
        .merge(crate::dashboard::dashboard_routes(state))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}
