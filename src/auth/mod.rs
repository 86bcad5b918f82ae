//! Authentication: password hashing plus login sessions.

pub mod extract;
pub mod password;
pub mod routes;
pub mod session;

pub use extract::{
    clear_session_cookie, session_cookie, set_cookie, token_from_headers, CurrentIdentity,
    SESSION_COOKIE,
};
pub use routes::auth_routes;
pub use session::{spawn_session_sweep, SessionManager};
