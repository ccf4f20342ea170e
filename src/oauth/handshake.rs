//! Per-attempt state carried in the session between start and callback.

use serde::{Deserialize, Serialize};

use crate::session::Session;

pub const HANDSHAKE_KEY: &str = "oauth_handshake";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeState {
    pub provider: String,
    pub state: String,
    pub next: Option<String>,
    pub api: bool,
}

impl HandshakeState {
    /// Write the handshake, replacing any previous one.
    ///
    /// # Errors
    /// Returns an error if the record cannot be serialized.
    pub fn stash(&self, session: &mut Session) -> Result<(), serde_json::Error> {
        session.insert(HANDSHAKE_KEY, self)
    }

    #[must_use]
    pub fn peek(session: &Session) -> Option<Self> {
        session.get(HANDSHAKE_KEY)
    }

    /// Remove the handshake; later reads see nothing.
    pub fn take(session: &mut Session) -> Option<Self> {
        session.take(HANDSHAKE_KEY)
    }
}

/// Keep `next` only when it is a local absolute path.
#[must_use]
pub fn safe_next(next: Option<&str>) -> Option<String> {
    let next = next?.trim();
    let local = next.starts_with('/')
        && !next.starts_with("//")
        && !next.contains('\\')
        && !next.contains("://")
        && !next.chars().any(char::is_control);
    local.then(|| next.to_string())
}
