use std::collections::HashMap;

use tokio::sync::RwLock;

use cashpoint_core::identity::UserAccount;

use super::{RepositoryError, UserRepository};

/// Test double for the user directory; server auth tests run against it
/// without a database.
#[derive(Default)]
pub struct InMemoryUserRepository {
    users: RwLock<HashMap<String, UserAccount>>,
}

#[async_trait::async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn find_by_username(
        &self,
        username: &str,
    ) -> Result<Option<UserAccount>, RepositoryError> {
        let users = self.users.read().await;
        Ok(users.get(username).cloned())
    }

    async fn upsert(&self, user: UserAccount) -> Result<(), RepositoryError> {
        let mut users = self.users.write().await;
        users.insert(user.username.clone(), user);
        Ok(())
    }
}
