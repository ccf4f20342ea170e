//! Local user lookup for resolved identity claims.
//!
//! The coordinator never creates accounts; it only asks a `UserStore` whether
//! the claimed identity belongs to someone. Claim values are normalized before
//! the lookup so provider casing or Unicode forms do not matter.

mod memory;
mod postgres;

pub use memory::MemoryUserStore;
pub use postgres::PgUserStore;

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;
use uuid::Uuid;

use crate::mfa::MfaState;

pub const EMAIL_FIELD: &str = "email";
pub const USERNAME_FIELD: &str = "username";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: Uuid,
    pub email: String,
    pub username: Option<String>,
    pub active: bool,
    pub mfa_state: MfaState,
}

impl UserRecord {
    #[must_use]
    pub fn new(email: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            email: normalize_email(email),
            username: None,
            active: true,
            mfa_state: MfaState::Disabled,
        }
    }

    #[must_use]
    pub fn with_username(mut self, username: &str) -> Self {
        self.username = Some(normalize_username(username));
        self
    }

    #[must_use]
    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    #[must_use]
    pub fn with_mfa_state(mut self, state: MfaState) -> Self {
        self.mfa_state = state;
        self
    }
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Find the user whose `field` equals the already-normalized `value`.
    /// Unsupported fields resolve to `None`.
    async fn find_by_identity(&self, field: &str, value: &str) -> Result<Option<UserRecord>>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserRecord>>;

    /// Liveness of the backing storage.
    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// Normalize an email for lookup/uniqueness checks.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Normalize a username: NFKC, trimmed, case-folded.
#[must_use]
pub fn normalize_username(username: &str) -> String {
    username.nfkc().collect::<String>().trim().to_lowercase()
}

/// Normalize a claim value according to the field it claims.
#[must_use]
pub fn normalize_identity(field: &str, value: &str) -> String {
    match field {
        EMAIL_FIELD => normalize_email(value),
        USERNAME_FIELD => normalize_username(value),
        _ => value.trim().to_string(),
    }
}

/// Basic email format check on already-normalized input.
#[must_use]
pub fn valid_email(email_normalized: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email_normalized))
}
