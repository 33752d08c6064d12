use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::repo::{StoreError, UserStore};
use super::repo_types::{NewUser, PasswordChange, User, UserChanges};

/// Credential store held in process memory. Every write happens under one lock,
/// so conditional updates are atomic.
#[derive(Debug, Default)]
pub struct MemoryUserStore {
    users: RwLock<HashMap<Uuid, User>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn live_match<'a>(
    users: impl Iterator<Item = &'a User>,
    token_hash: &str,
    now: OffsetDateTime,
) -> Option<Uuid> {
    users
        .filter(|u| u.active)
        .find(|u| {
            u.reset
                .as_ref()
                .is_some_and(|t| t.token_hash == token_hash && t.is_live(now))
        })
        .map(|u| u.id)
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let users = self.users.read().await;
        Ok(users
            .values()
            .find(|u| u.active && u.email == email)
            .cloned())
    }

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let users = self.users.read().await;
        Ok(users.get(&id).filter(|u| u.active).cloned())
    }

    async fn create_user(&self, user: NewUser) -> Result<User, StoreError> {
        let mut users = self.users.write().await;
        // uniqueness spans deactivated accounts too
        if users.values().any(|u| u.email == user.email) {
            return Err(StoreError::Duplicate(user.email));
        }
        let user = user.into_user(Uuid::new_v4());
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn update_user(
        &self,
        id: Uuid,
        changes: UserChanges,
    ) -> Result<Option<User>, StoreError> {
        let mut users = self.users.write().await;
        if let Some(email) = &changes.email {
            if users.values().any(|u| u.id != id && &u.email == email) {
                return Err(StoreError::Duplicate(email.clone()));
            }
        }
        let Some(user) = users.get_mut(&id).filter(|u| u.active) else {
            return Ok(None);
        };
        changes.apply(user);
        Ok(Some(user.clone()))
    }

    async fn find_user_by_reset_hash(
        &self,
        token_hash: &str,
        now: OffsetDateTime,
    ) -> Result<Option<User>, StoreError> {
        let users = self.users.read().await;
        Ok(live_match(users.values(), token_hash, now).and_then(|id| users.get(&id).cloned()))
    }

    async fn consume_reset(
        &self,
        token_hash: &str,
        now: OffsetDateTime,
        password: PasswordChange,
    ) -> Result<Option<User>, StoreError> {
        let mut users = self.users.write().await;
        let Some(id) = live_match(users.values(), token_hash, now) else {
            return Ok(None);
        };
        let Some(user) = users.get_mut(&id) else {
            return Ok(None);
        };
        UserChanges::password(password).apply(user);
        Ok(Some(user.clone()))
    }

    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        let users = self.users.read().await;
        let mut list: Vec<User> = users.values().filter(|u| u.active).cloned().collect();
        list.sort_by_key(|u| u.created_at);
        Ok(list)
    }
}
