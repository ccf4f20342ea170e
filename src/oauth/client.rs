//! The seam between the coordinator and the OAuth library.

use async_trait::async_trait;
use secrecy::SecretString;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

/// A protocol-level failure reported by the OAuth library or the provider,
/// carried as the `(error, error_description)` pair from RFC 6749.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{error}: {description}")]
pub struct ProtocolError {
    pub error: String,
    pub description: String,
}

impl ProtocolError {
    pub fn new(error: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            description: description.into(),
        }
    }

    /// The state echoed by the provider does not match the stashed one.
    #[must_use]
    pub fn mismatching_state() -> Self {
        Self::new(
            "mismatching_state",
            "CSRF Warning! State not equal in request and response.",
        )
    }
}

/// Where to send the user, plus the state token the library bound to it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthorizationRequest {
    pub url: String,
    pub state: String,
}

/// Query or form parameters the provider sent to the callback.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CallbackParams(HashMap<String, String>);

impl CallbackParams {
    #[must_use]
    pub fn new(params: HashMap<String, String>) -> Self {
        Self(params)
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for CallbackParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }
}

#[derive(Clone, Debug)]
pub struct OAuthToken {
    pub access_token: SecretString,
}

impl OAuthToken {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: SecretString::from(access_token.into()),
        }
    }
}

/// Operations the coordinator needs from an OAuth client library.
#[async_trait]
pub trait OAuthClient: Send + Sync {
    /// Build the provider authorization URL for the given callback.
    ///
    /// # Errors
    /// Returns a `ProtocolError` when the library cannot build the request.
    fn authorize_redirect(&self, redirect_uri: &str) -> Result<AuthorizationRequest, ProtocolError>;

    /// Validate the callback against `expected_state` and exchange the code.
    ///
    /// # Errors
    /// Returns a `ProtocolError` on a state mismatch, a provider-reported
    /// error or a failed exchange.
    async fn authorize_access_token(
        &self,
        params: &CallbackParams,
        expected_state: Option<&str>,
        redirect_uri: &str,
    ) -> Result<OAuthToken, ProtocolError>;

    /// Fetch a JSON resource with the access token.
    ///
    /// # Errors
    /// Returns a `ProtocolError` when the request fails or the body is not JSON.
    async fn get(&self, resource: &str, token: &OAuthToken) -> Result<Value, ProtocolError>;
}
