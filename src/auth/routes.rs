//! Login and logout endpoints.

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Form, Router};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::app::{redirect, render, render_form, AppState};
use crate::error::Error;
use crate::navigation::Route;
use crate::registration::forms::{FormErrors, REQUIRED};

use super::extract::{clear_session_cookie, session_cookie, set_cookie, token_from_headers};
use super::password::{verify_password_blocking, DUMMY_HASH};

const INVALID_LOGIN: &str = "Please enter a correct username and password.";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LoginForm {
    pub username: String,
    pub password: Option<SecretString>,
    pub next: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct NextQuery {
    pub next: Option<String>,
}

/// Where to go after login: `next` if it is a local path, else the dashboard.
pub fn post_login_target(next: Option<&str>) -> String {
    match next {
        Some(path) if path.starts_with('/') && !path.starts_with("//") && !path.contains('\\') => {
            path.to_string()
        }
        _ => Route::Dashboard.path().to_string(),
    }
}

/// GET /login
async fn login_form(Query(query): Query<NextQuery>) -> Response {
    render(Route::Login, json!({ "errors": {}, "values": { "next": query.next } }))
}

/// POST /login
async fn login_submit(
    State(state): State<AppState>,
    Form(form): Form<LoginForm>,
) -> Result<Response, Error> {
    let values = json!({ "username": form.username, "next": form.next });
    let mut errors = FormErrors::new();

    let username = form.username.trim();
    let password = form.password.filter(|p| !p.expose_secret().is_empty());
    if username.is_empty() {
        errors.add("username", REQUIRED);
    }
    let Some(password) = password else {
        errors.add("password", REQUIRED);
        return Ok(render_form(Route::Login, &errors, values));
    };
    if !errors.is_empty() {
        return Ok(render_form(Route::Login, &errors, values));
    }

    let identity = state.db.get_identity_by_username(username).await?;
    let phc = identity
        .as_ref()
        .map_or_else(|| DUMMY_HASH.to_string(), |i| i.password_hash.clone());
    let verified = verify_password_blocking(password, phc).await? && identity.is_some();
    let identity = match identity {
        Some(identity) if verified => identity,
        _ => {
            info!(username = %username, "Failed login attempt");
            errors.add_non_field(INVALID_LOGIN);
            return Ok(render_form(Route::Login, &errors, values));
        }
    };

    let session = state.sessions.start(identity.id).await?;
    let target = post_login_target(form.next.as_deref());
    let mut response = redirect(&target, None);
    set_cookie(
        &mut response,
        &session_cookie(&session.token, state.sessions.ttl().as_secs()),
    );
    info!(identity_id = %identity.id, "Logged in");
    Ok(response)
}

/// POST /logout
async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Result<Response, Error> {
    if let Some(token) = token_from_headers(&headers) {
        state.sessions.end(&token).await?;
    }
    let mut response = redirect(Route::Home.path(), None);
    set_cookie(&mut response, &clear_session_cookie());
    Ok(response)
}

/// Build the login/logout routes.
pub fn auth_routes(state: AppState) -> Router {
    Router::new()
        .route("/login", get(login_form).post(login_submit))
        .route("/logout", post(logout))
        .with_state(state)
}
