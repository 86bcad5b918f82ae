//! Login sessions stored in the database.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::accounts::{Identity, Session};
use crate::error::DatabaseError;
use crate::store::Database;

/// Length of generated session tokens.
pub const TOKEN_LEN: usize = 48;

/// How often expired sessions are swept.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(600);

/// Generate a random alphanumeric session token.
pub fn generate_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect()
}

/// Issues and resolves login sessions stored in the database.
pub struct SessionManager {
    db: Arc<dyn Database>,
    ttl: Duration,
}

impl SessionManager {
    pub fn new(db: Arc<dyn Database>, ttl: Duration) -> Self {
        Self { db, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Start a session for an identity.
    pub async fn start(&self, identity_id: Uuid) -> Result<Session, DatabaseError> {
        let now = Utc::now();
        let expires_at = chrono::Duration::from_std(self.ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .ok_or_else(|| {
                DatabaseError::Serialization(format!("Session TTL out of range: {:?}", self.ttl))
            })?;
        let session = Session {
            token: generate_token(),
            identity_id,
            created_at: now,
            expires_at,
        };
        self.db.create_session(&session).await?;
        info!(identity_id = %identity_id, "Session started");
        Ok(session)
    }

    /// Resolve a token to its identity. Expired sessions are deleted.
    pub async fn resolve(&self, token: &str) -> Result<Option<Identity>, DatabaseError> {
        let Some(session) = self.db.get_session(token).await? else {
            return Ok(None);
        };
        if session.is_expired() {
            debug!(identity_id = %session.identity_id, "Dropping expired session");
            self.db.delete_session(token).await?;
            return Ok(None);
        }
        self.db.get_identity(session.identity_id).await
    }

    /// End a session. Returns whether it existed.
    pub async fn end(&self, token: &str) -> Result<bool, DatabaseError> {
        let existed = self.db.delete_session(token).await?;
        if existed {
            info!("Session ended");
        }
        Ok(existed)
    }

    /// Delete every expired session.
    pub async fn purge_expired(&self) -> Result<usize, DatabaseError> {
        let purged = self.db.purge_expired_sessions().await?;
        if purged > 0 {
            info!(count = purged, "Purged expired sessions");
        }
        Ok(purged)
    }
}

/// Spawn the background task that sweeps expired sessions.
pub fn spawn_session_sweep(sessions: Arc<SessionManager>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        interval.tick().await; // first tick fires immediately
        loop {
            interval.tick().await;
            if let Err(e) = sessions.purge_expired().await {
                warn!("Session sweep failed: {e}");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LibSqlBackend;

    async fn setup(ttl: Duration) -> (Arc<dyn Database>, SessionManager, Identity) {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let identity = Identity::new("amina", "amina@example.com", "hash");
        let profile = crate::accounts::PatientProfile {
            identity_id: identity.id,
            full_name: "Amina".into(),
            phone_no: "03001234567".into(),
        };
        db.create_patient_account(&identity, &profile).await.unwrap();
        let sessions = SessionManager::new(db.clone(), ttl);
        (db, sessions, identity)
    }

    #[test]
    fn tokens_are_alphanumeric() {
        let token = generate_token();
        assert_eq!(token.len(), TOKEN_LEN);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(token, generate_token());
    }

    #[tokio::test]
    async fn start_resolve_end() {
        let (_db, sessions, identity) = setup(Duration::from_secs(3600)).await;

        let session = sessions.start(identity.id).await.unwrap();
        let resolved = sessions.resolve(&session.token).await.unwrap().unwrap();
        assert_eq!(resolved.id, identity.id);
        assert_eq!(resolved.username, "amina");

        assert!(sessions.end(&session.token).await.unwrap());
        assert!(sessions.resolve(&session.token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_token_resolves_to_none() {
        let (_db, sessions, _identity) = setup(Duration::from_secs(3600)).await;
        assert!(sessions.resolve("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_session_is_deleted_on_resolve() {
        let (db, sessions, identity) = setup(Duration::ZERO).await;

        let session = sessions.start(identity.id).await.unwrap();
        assert!(sessions.resolve(&session.token).await.unwrap().is_none());
        assert!(db.get_session(&session.token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn purge_counts_expired() {
        let (_db, sessions, identity) = setup(Duration::ZERO).await;
        sessions.start(identity.id).await.unwrap();
        sessions.start(identity.id).await.unwrap();
        assert_eq!(sessions.purge_expired().await.unwrap(), 2);
        assert_eq!(sessions.purge_expired().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn out_of_range_ttl_is_an_error() {
        let (db, sessions, identity) = setup(Duration::from_secs(u64::MAX)).await;
        assert!(matches!(
            sessions.start(identity.id).await,
            Err(DatabaseError::Serialization(_))
        ));
        assert_eq!(db.purge_expired_sessions().await.unwrap(), 0);
    }
}
