//! Request-side session handling: token transport and the
//! [`CurrentIdentity`] extractor.

use axum::extract::FromRequestParts;
use axum::http::header::{AUTHORIZATION, COOKIE, SET_COOKIE};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Response};

use crate::accounts::Identity;
use crate::app::{redirect, AppState};
use crate::error::Error;
use crate::navigation::Route;

/// Name of the session cookie.
pub const SESSION_COOKIE: &str = "session_id";

/// Pull a session token from the `session_id` cookie or a Bearer header.
pub fn token_from_headers(headers: &HeaderMap) -> Option<String> {
    let from_cookie = headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.trim().to_string())
        .filter(|v| !v.is_empty());
    if from_cookie.is_some() {
        return from_cookie;
    }

    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// `Set-Cookie` value carrying a session token.
pub fn session_cookie(token: &str, max_age_secs: u64) -> String {
    format!("{SESSION_COOKIE}={token}; HttpOnly; SameSite=Lax; Path=/; Max-Age={max_age_secs}")
}

/// `Set-Cookie` value that clears the session cookie.
pub fn clear_session_cookie() -> String {
    format!("{SESSION_COOKIE}=; HttpOnly; SameSite=Lax; Path=/; Max-Age=0")
}

/// Append a `Set-Cookie` header to a response.
pub fn set_cookie(response: &mut Response, cookie: &str) {
    match HeaderValue::from_str(cookie) {
        Ok(value) => {
            response.headers_mut().append(SET_COOKIE, value);
        }
        Err(e) => tracing::warn!("Dropping unencodable cookie: {e}"),
    }
}

/// Login URL that returns to `path` afterwards.
pub fn login_url(path: &str) -> String {
    format!("{}?next={}", Route::Login.path(), path)
}

/// The identity behind the request's session.
///
/// Rejects with a redirect to the login page when there is no live session.
#[derive(Debug, Clone)]
pub struct CurrentIdentity(pub Identity);

impl FromRequestParts<AppState> for CurrentIdentity {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let identity = match token_from_headers(&parts.headers) {
            Some(token) => state
                .sessions
                .resolve(&token)
                .await
                .map_err(|e| Error::from(e).into_response())?,
            None => None,
        };

        match identity {
            Some(identity) => Ok(Self(identity)),
            None => {
                tracing::debug!(path = parts.uri.path(), "Unauthenticated request");
                Err(redirect(&login_url(parts.uri.path()), None))
            }
        }
    }
}
