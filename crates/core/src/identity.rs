//! Principal resolution building blocks: stored user accounts with argon2
//! password hashes. Roles come from the user record, never from the caller.

use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use chrono::{DateTime, Utc};
use password_hash::{PasswordHash, SaltString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::principal::{Principal, Role};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("invalid username or password")]
    InvalidCredentials,
    #[error("session token is unknown or expired")]
    UnknownSession,
    #[error("password hashing failed: {0}")]
    Hashing(String),
}

/// One row of the user directory. `password_hash` is a PHC-format argon2 string.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccount {
    pub username: String,
    pub password_hash: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

impl UserAccount {
    pub fn principal(&self) -> Principal {
        Principal::new(self.username.clone(), self.role)
    }
}

pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let mut salt_bytes = [0u8; 16];
    getrandom::getrandom(&mut salt_bytes).map_err(|e| AuthError::Hashing(e.to_string()))?;
    let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| AuthError::Hashing(e.to_string()))?;
    let phc = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AuthError::Hashing(e.to_string()))?
        .to_string();
    Ok(phc)
}

pub fn verify_password(hash: &str, password: &str) -> bool {
    if let Ok(parsed) = PasswordHash::new(hash) {
        Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok()
    } else {
        false
    }
}
