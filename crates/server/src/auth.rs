//! Bearer-session authentication for the API surface.
//!
//! Credentials are checked against the stored user directory (argon2 hashes,
//! role on the user row); successful logins get an opaque token held in an
//! in-process session table with a TTL. Token issuance stays out of the
//! workflow core.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use cashpoint_core::domain::principal::Principal;
use cashpoint_core::identity::{verify_password, AuthError};
use cashpoint_db::UserRepository;

#[derive(Debug, Error)]
pub enum LoginError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("user directory lookup failed: {0}")]
    Directory(String),
}

#[derive(Debug, Clone)]
struct SessionEntry {
    principal: Principal,
    issued_at: Instant,
}

/// In-process session table. Entries expire after the configured TTL and are
/// dropped lazily on resolution.
#[derive(Clone)]
pub struct SessionManager {
    sessions: Arc<RwLock<HashMap<String, SessionEntry>>>,
    ttl: Duration,
}

impl SessionManager {
    pub fn new(ttl: Duration) -> Self {
        Self { sessions: Arc::new(RwLock::new(HashMap::new())), ttl }
    }

    /// Verify credentials against the user directory and issue a session
    /// token. The role on the stored account becomes the session principal's
    /// role; nothing the caller sends can influence it.
    pub async fn login(
        &self,
        users: &dyn UserRepository,
        username: &str,
        password: &str,
    ) -> Result<String, LoginError> {
        let account = users
            .find_by_username(username)
            .await
            .map_err(|error| LoginError::Directory(error.to_string()))?;

        let Some(account) = account else {
            // Same error as a bad password: usernames are not probeable.
            warn!(event_name = "auth.login_rejected", username = %username, "unknown username");
            return Err(AuthError::InvalidCredentials.into());
        };

        if !verify_password(&account.password_hash, password) {
            warn!(event_name = "auth.login_rejected", username = %username, "password mismatch");
            return Err(AuthError::InvalidCredentials.into());
        }

        let token = generate_session_token();
        let principal = account.principal();
        let mut sessions = self.sessions.write().await;
        sessions.insert(
            token.clone(),
            SessionEntry { principal: principal.clone(), issued_at: Instant::now() },
        );
        debug!(
            event_name = "auth.session_issued",
            username = %principal.username,
            role = principal.role.as_str(),
            "session issued"
        );
        Ok(token)
    }

    /// Map a presented bearer token back to its principal, expiring stale
    /// sessions on the way.
    pub async fn resolve(&self, token: &str) -> Result<Principal, AuthError> {
        {
            let sessions = self.sessions.read().await;
            match sessions.get(token) {
                Some(entry) if entry.issued_at.elapsed() <= self.ttl => {
                    return Ok(entry.principal.clone());
                }
                Some(_) => {}
                None => return Err(AuthError::UnknownSession),
            }
        }

        let mut sessions = self.sessions.write().await;
        sessions.remove(token);
        Err(AuthError::UnknownSession)
    }

    pub async fn revoke(&self, token: &str) -> bool {
        let mut sessions = self.sessions.write().await;
        sessions.remove(token).is_some()
    }
}

fn generate_session_token() -> String {
    use rand::Rng;
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    const TOKEN_LEN: usize = 32;

    let mut rng = rand::thread_rng();
    (0..TOKEN_LEN)
        .map(|_| {
            let idx = rng.gen_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect()
}
