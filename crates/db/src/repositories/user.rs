use chrono::{DateTime, Utc};
use sqlx::Row;

use cashpoint_core::domain::principal::Role;
use cashpoint_core::identity::UserAccount;

use super::{RepositoryError, UserRepository};
use crate::DbPool;

pub struct SqlUserRepository {
    pool: DbPool,
}

impl SqlUserRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_user(row: &sqlx::sqlite::SqliteRow) -> Result<UserAccount, RepositoryError> {
    let username: String =
        row.try_get("username").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let password_hash: String =
        row.try_get("password_hash").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let role_str: String =
        row.try_get("role").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let created_at_str: String =
        row.try_get("created_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    let role = Role::parse(&role_str)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown role `{role_str}`")))?;
    let created_at = DateTime::parse_from_rfc3339(&created_at_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("invalid created_at: {e}")))?;

    Ok(UserAccount { username, password_hash, role, created_at })
}

#[async_trait::async_trait]
impl UserRepository for SqlUserRepository {
    async fn find_by_username(
        &self,
        username: &str,
    ) -> Result<Option<UserAccount>, RepositoryError> {
        let row = sqlx::query(
            "SELECT username, password_hash, role, created_at
             FROM user_account WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_user(r)?)),
            None => Ok(None),
        }
    }

    async fn upsert(&self, user: UserAccount) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO user_account (username, password_hash, role, created_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(username) DO UPDATE SET
                 password_hash = excluded.password_hash,
                 role = excluded.role",
        )
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(user.role.as_str())
        .bind(user.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
