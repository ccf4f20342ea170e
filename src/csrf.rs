//! Session-bound anti-forgery tokens.
//!
//! A token is minted into the session when a page that posts back is rendered
//! (or when a JSON client asks for one) and must be echoed on state-changing
//! requests, either as the `csrf_token` form field or the `X-CSRF-Token` header.

use anyhow::{Context, Result};
use base64::Engine;
use rand::{RngCore, rngs::OsRng};
use thiserror::Error;

use crate::session::{CSRF_TOKEN_KEY, Session};

pub const CSRF_HEADER: &str = "x-csrf-token";
pub const CSRF_FIELD: &str = "csrf_token";

#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum CsrfError {
    #[error("csrf token missing")]
    Missing,
    #[error("csrf token invalid")]
    Invalid,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct CsrfConfig {
    enabled: bool,
    ignore_unauth_endpoints: bool,
}

impl CsrfConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Skip the check for callers that are not logged in yet.
    #[must_use]
    pub fn with_ignore_unauth_endpoints(mut self, ignore: bool) -> Self {
        self.ignore_unauth_endpoints = ignore;
        self
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    #[must_use]
    pub fn ignore_unauth_endpoints(&self) -> bool {
        self.ignore_unauth_endpoints
    }

    /// Whether a request from a caller with the given auth status must carry a token.
    #[must_use]
    pub fn requires_check(&self, authenticated: bool) -> bool {
        self.enabled && (authenticated || !self.ignore_unauth_endpoints)
    }
}

/// Return the session's token, minting one on first use.
///
/// # Errors
/// Returns an error if the random source fails.
pub fn issue_token(session: &mut Session) -> Result<String> {
    if let Some(token) = session.get::<String>(CSRF_TOKEN_KEY) {
        return Ok(token);
    }
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate csrf token")?;
    let token = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes);
    session.set_value(CSRF_TOKEN_KEY, serde_json::Value::String(token.clone()));
    Ok(token)
}

/// Compare a presented token against the one bound to the session.
///
/// # Errors
/// `Missing` when nothing was presented, `Invalid` when the session has no token
/// or the values differ.
pub fn validate(session: &Session, presented: Option<&str>) -> Result<(), CsrfError> {
    let presented = presented
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or(CsrfError::Missing)?;
    let expected = session
        .get::<String>(CSRF_TOKEN_KEY)
        .ok_or(CsrfError::Invalid)?;
    if constant_time_eq(expected.as_bytes(), presented.as_bytes()) {
        Ok(())
    } else {
        Err(CsrfError::Invalid)
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
