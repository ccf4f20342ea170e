//! Read-only user lookup against the `users` table.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{Connection, PgPool, Row, postgres::PgRow};
use tracing::{Instrument, info_span};
use uuid::Uuid;

use super::{EMAIL_FIELD, USERNAME_FIELD, UserRecord, UserStore};
use crate::mfa::MfaState;

const SELECT_USER: &str = "SELECT id, email, username, active, mfa_state FROM users";

#[derive(Clone, Debug)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn user_from_row(row: &PgRow) -> Result<UserRecord> {
    let mfa_state: Option<String> = row.try_get("mfa_state").context("read mfa_state")?;
    Ok(UserRecord {
        id: row.try_get("id").context("read id")?,
        email: row.try_get("email").context("read email")?,
        username: row.try_get("username").context("read username")?,
        active: row.try_get("active").context("read active")?,
        mfa_state: mfa_state
            .as_deref()
            .and_then(MfaState::parse)
            .unwrap_or_default(),
    })
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_identity(&self, field: &str, value: &str) -> Result<Option<UserRecord>> {
        // Column names never come from the claim itself.
        let query = match field {
            EMAIL_FIELD => format!("{SELECT_USER} WHERE lower(email) = $1"),
            USERNAME_FIELD => format!("{SELECT_USER} WHERE lower(username) = $1"),
            _ => return Ok(None),
        };
        let span = info_span!("db.query", db.system = "postgresql", db.operation = "SELECT");
        let row = sqlx::query(&query)
            .bind(value)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .with_context(|| format!("failed to look up user by {field}"))?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserRecord>> {
        let query = format!("{SELECT_USER} WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("failed to look up user by id")?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .context("failed to acquire database connection")?;
        conn.ping().await.context("failed to ping database")
    }
}
