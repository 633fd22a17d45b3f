use cashpoint_core::domain::principal::Role;
use cashpoint_core::identity::{hash_password, UserAccount};
use chrono::Utc;
use sqlx::Row;

use crate::connection::DbPool;
use crate::repositories::{RepositoryError, SqlUserRepository, UserRepository};

/// Canonical demo accounts, one per role in the authorization matrix.
const SEED_USERS: &[(&str, Role)] = &[
    ("atm_staff", Role::Staff),
    ("branch_manager", Role::BranchManager),
    ("head_officer", Role::HeadOfficer),
    ("vault_manager", Role::VaultManager),
];

pub const DEFAULT_SEED_PASSWORD: &str = "password123";

#[derive(Debug)]
pub struct SeedResult {
    pub users_seeded: Vec<SeedUserInfo>,
}

#[derive(Debug)]
pub struct SeedUserInfo {
    pub username: &'static str,
    pub role: Role,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}

/// Deterministic demo user dataset: every role from the matrix, each with an
/// argon2 hash of the supplied password.
pub struct SeedUsers;

impl SeedUsers {
    pub async fn load(pool: &DbPool, password: &str) -> Result<SeedResult, RepositoryError> {
        let repo = SqlUserRepository::new(pool.clone());
        let mut users_seeded = Vec::with_capacity(SEED_USERS.len());

        for (username, role) in SEED_USERS {
            let password_hash = hash_password(password)
                .map_err(|error| RepositoryError::Decode(error.to_string()))?;
            repo.upsert(UserAccount {
                username: (*username).to_string(),
                password_hash,
                role: *role,
                created_at: Utc::now(),
            })
            .await?;
            users_seeded.push(SeedUserInfo { username, role: *role });
        }

        Ok(SeedResult { users_seeded })
    }

    /// Confirm every seed account landed with its expected role.
    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::with_capacity(SEED_USERS.len());

        for (username, role) in SEED_USERS {
            let count = sqlx::query(
                "SELECT COUNT(*) AS count FROM user_account WHERE username = ? AND role = ?",
            )
            .bind(username)
            .bind(role.as_str())
            .fetch_one(pool)
            .await?
            .get::<i64, _>("count");

            checks.push((*username, count == 1));
        }

        let all_present = checks.iter().all(|(_, present)| *present);
        Ok(VerificationResult { all_present, checks })
    }
}
