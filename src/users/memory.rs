use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{EMAIL_FIELD, USERNAME_FIELD, UserRecord, UserStore, valid_email};

/// In-process user table for local development and tests.
#[derive(Default)]
pub struct MemoryUserStore {
    users: RwLock<HashMap<Uuid, UserRecord>>,
}

impl MemoryUserStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, user: UserRecord) {
        self.users.write().await.insert(user.id, user);
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_identity(&self, field: &str, value: &str) -> Result<Option<UserRecord>> {
        let users = self.users.read().await;
        let found = match field {
            EMAIL_FIELD if valid_email(value) => users.values().find(|user| user.email == value),
            USERNAME_FIELD => users
                .values()
                .find(|user| user.username.as_deref() == Some(value)),
            _ => None,
        };
        Ok(found.cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserRecord>> {
        Ok(self.users.read().await.get(&id).cloned())
    }
}
