use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use super::{Session, SessionStore, generate_session_token, hash_session_token};

struct Entry {
    values: Map<String, Value>,
    touched_at: Instant,
}

/// Process-local session store. Entries expire `ttl` after their last save.
pub struct MemorySessionStore {
    ttl: Duration,
    entries: Mutex<HashMap<Vec<u8>, Entry>>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, token: Option<&str>) -> Session {
        let Some(token) = token else {
            return Session::new();
        };
        let entries = self.entries.lock().await;
        match entries.get(&hash_session_token(token)) {
            Some(entry) if entry.touched_at.elapsed() < self.ttl => {
                Session::from_parts(token.to_string(), entry.values.clone())
            }
            _ => Session::new(),
        }
    }

    async fn save(&self, session: &Session) -> Result<String> {
        let token = match session.token() {
            Some(token) if !session.is_renewed() => token.to_string(),
            _ => generate_session_token()?,
        };

        let mut entries = self.entries.lock().await;
        entries.retain(|_, entry| entry.touched_at.elapsed() < self.ttl);
        if session.is_renewed()
            && let Some(previous) = session.token()
        {
            entries.remove(&hash_session_token(previous));
        }
        entries.insert(
            hash_session_token(&token),
            Entry {
                values: session.values().clone(),
                touched_at: Instant::now(),
            },
        );
        Ok(token)
    }

    async fn delete(&self, token: &str) {
        let mut entries = self.entries.lock().await;
        entries.remove(&hash_session_token(token));
    }
}
