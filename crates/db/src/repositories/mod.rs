use async_trait::async_trait;
use thiserror::Error;

use cashpoint_core::identity::UserAccount;

pub mod memory;
pub mod refill;
pub mod user;

pub use memory::InMemoryUserRepository;
pub use refill::SqlRefillStore;
pub use user::SqlUserRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

/// User directory consulted during principal resolution. The stored role is
/// authoritative; callers never supply their own.
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_username(
        &self,
        username: &str,
    ) -> Result<Option<UserAccount>, RepositoryError>;

    async fn upsert(&self, user: UserAccount) -> Result<(), RepositoryError>;
}
