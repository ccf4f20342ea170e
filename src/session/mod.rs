//! Server-side sessions keyed by an opaque cookie token.
//!
//! The raw token only travels in the cookie; stores key entries on its SHA-256
//! hash. Values are JSON so collaborators can stash typed records under
//! well-known keys.
//!
//! A `Session` is loaded once per request, passed explicitly (`&mut Session`)
//! to whoever needs it, and saved back only when modified.

mod memory;

pub use memory::MemorySessionStore;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderValue, header::InvalidHeaderValue};
use base64::Engine;
use rand::{RngCore, rngs::OsRng};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};
use uuid::Uuid;

pub const SESSION_COOKIE_NAME: &str = "federa_session";

const USER_ID_KEY: &str = "user_id";
/// Anti-forgery token; bound to one authentication state.
pub(crate) const CSRF_TOKEN_KEY: &str = "csrf_token";
const FLASHES_KEY: &str = "_flashes";
const DEFAULT_SESSION_TTL_SECONDS: u64 = 12 * 60 * 60;

/// A message stored for display on the next rendered page.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flash {
    pub category: String,
    pub message: String,
}

#[derive(Clone, Debug, Default)]
pub struct Session {
    token: Option<String>,
    values: Map<String, Value>,
    modified: bool,
    renewed: bool,
}

impl Session {
    /// A fresh, empty session with no token yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_parts(token: String, values: Map<String, Value>) -> Self {
        Self {
            token: Some(token),
            values,
            modified: false,
            renewed: false,
        }
    }

    #[must_use]
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    #[must_use]
    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Read a typed value; malformed entries read as absent.
    #[must_use]
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.values
            .get(key)
            .cloned()
            .and_then(|value| serde_json::from_value(value).ok())
    }

    /// Store a typed value, replacing any previous one.
    ///
    /// # Errors
    /// Returns an error if the value cannot be serialized to JSON.
    pub fn insert<T: Serialize>(&mut self, key: &str, value: &T) -> Result<(), serde_json::Error> {
        let value = serde_json::to_value(value)?;
        self.set_value(key, value);
        Ok(())
    }

    pub fn set_value(&mut self, key: &str, value: Value) {
        self.values.insert(key.to_string(), value);
        self.modified = true;
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let removed = self.values.remove(key);
        if removed.is_some() {
            self.modified = true;
        }
        removed
    }

    /// Remove and decode a value in one step.
    pub fn take<T: DeserializeOwned>(&mut self, key: &str) -> Option<T> {
        self.remove(key)
            .and_then(|value| serde_json::from_value(value).ok())
    }

    #[must_use]
    pub fn user_id(&self) -> Option<Uuid> {
        self.values
            .get(USER_ID_KEY)
            .and_then(Value::as_str)
            .and_then(|value| Uuid::parse_str(value).ok())
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.user_id().is_some()
    }

    /// Bind the session to a user. The token is rotated on save and the CSRF
    /// token issued before login is dropped.
    pub fn login(&mut self, user_id: Uuid) {
        self.renew();
        self.remove(CSRF_TOKEN_KEY);
        self.set_value(USER_ID_KEY, Value::String(user_id.to_string()));
    }

    /// Drop the user binding and CSRF token but keep other values (flashes,
    /// pending records). The token is rotated on save.
    pub fn logout(&mut self) {
        self.renew();
        self.remove(CSRF_TOKEN_KEY);
        self.remove(USER_ID_KEY);
    }

    /// Drop every value and rotate the token on save.
    pub fn clear(&mut self) {
        self.values.clear();
        self.renew();
    }

    /// Ask the store to issue a new token for this session on save.
    pub fn renew(&mut self) {
        self.renewed = true;
        self.modified = true;
    }

    pub fn flash(&mut self, category: &str, message: &str) {
        let entry = json!({ "category": category, "message": message });
        match self.values.get_mut(FLASHES_KEY) {
            Some(Value::Array(flashes)) => flashes.push(entry),
            _ => {
                self.values
                    .insert(FLASHES_KEY.to_string(), Value::Array(vec![entry]));
            }
        }
        self.modified = true;
    }

    pub fn take_flashes(&mut self) -> Vec<Flash> {
        self.take(FLASHES_KEY).unwrap_or_default()
    }

    #[must_use]
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    #[must_use]
    pub fn is_renewed(&self) -> bool {
        self.renewed
    }
}

/// Backing storage for sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load the session for a presented token. Unknown or expired tokens yield a
    /// fresh session.
    async fn load(&self, token: Option<&str>) -> Session;

    /// Persist the session and return the token the client must hold from now on.
    ///
    /// # Errors
    /// Returns an error if a new token cannot be generated or the write fails.
    async fn save(&self, session: &Session) -> Result<String>;

    /// Forget a session entirely.
    async fn delete(&self, token: &str);
}

/// `SameSite` attribute of the session cookie.
///
/// Providers that answer with `response_mode=form_post` send a cross-site POST
/// back to the callback; `Lax` cookies are not attached to it, so those
/// deployments need `None` (which implies `Secure`).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    #[default]
    Lax,
    None,
}

impl SameSite {
    /// # Errors
    /// Returns an error for anything other than `strict`, `lax` or `none`.
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "lax" => Ok(Self::Lax),
            "none" => Ok(Self::None),
            other => Err(anyhow!("invalid SameSite value: {other}")),
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Strict => "Strict",
            Self::Lax => "Lax",
            Self::None => "None",
        }
    }
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    ttl_seconds: u64,
    cookie_secure: bool,
    same_site: SameSite,
}

impl SessionConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            cookie_secure: false,
            same_site: SameSite::default(),
        }
    }

    #[must_use]
    pub fn with_ttl_seconds(mut self, seconds: u64) -> Self {
        self.ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_cookie_secure(mut self, secure: bool) -> Self {
        self.cookie_secure = secure;
        self
    }

    #[must_use]
    pub fn with_same_site(mut self, same_site: SameSite) -> Self {
        self.same_site = same_site;
        self
    }

    #[must_use]
    pub fn ttl_seconds(&self) -> u64 {
        self.ttl_seconds
    }

    /// Browsers drop `SameSite=None` cookies that are not `Secure`.
    #[must_use]
    pub fn cookie_secure(&self) -> bool {
        self.cookie_secure || self.same_site == SameSite::None
    }

    #[must_use]
    pub fn same_site(&self) -> SameSite {
        self.same_site
    }

    fn cookie_attributes(&self, max_age: u64) -> String {
        let mut attributes = format!(
            "Path=/; HttpOnly; SameSite={}; Max-Age={max_age}",
            self.same_site.as_str()
        );
        if self.cookie_secure() {
            attributes.push_str("; Secure");
        }
        attributes
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a new random session token for the cookie.
pub(crate) fn generate_session_token() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate session token")?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

/// Hash a session token so raw values never reach storage.
pub(crate) fn hash_session_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

/// Build a secure `HttpOnly` cookie for the session token.
///
/// # Errors
/// Returns an error if the token contains bytes not allowed in a header.
pub fn session_cookie(config: &SessionConfig, token: &str) -> Result<HeaderValue, InvalidHeaderValue> {
    let attributes = config.cookie_attributes(config.ttl_seconds());
    HeaderValue::from_str(&format!("{SESSION_COOKIE_NAME}={token}; {attributes}"))
}

/// Build a cookie that expires the session immediately.
///
/// # Errors
/// Returns an error if the cookie cannot be encoded as a header value.
pub fn clear_session_cookie(config: &SessionConfig) -> Result<HeaderValue, InvalidHeaderValue> {
    let attributes = config.cookie_attributes(0);
    HeaderValue::from_str(&format!("{SESSION_COOKIE_NAME}=; {attributes}"))
}

/// Read the session token from the `Cookie` header.
#[must_use]
pub fn extract_session_token(headers: &HeaderMap) -> Option<String> {
    for header in headers.get_all(axum::http::header::COOKIE) {
        let Ok(value) = header.to_str() else {
            continue;
        };
        for pair in value.split(';') {
            let mut parts = pair.trim().splitn(2, '=');
            let (Some(key), Some(val)) = (parts.next(), parts.next()) else {
                continue;
            };
            let val = val.trim();
            if key.trim() == SESSION_COOKIE_NAME && !val.is_empty() {
                return Some(val.to_string());
            }
        }
    }
    None
}
