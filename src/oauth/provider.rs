//! Provider descriptors: a client plus the rule that turns a token into a
//! single local identity claim.

use async_trait::async_trait;
use std::sync::Arc;

use super::client::{OAuthClient, OAuthToken, ProtocolError};
use crate::users::EMAIL_FIELD;

pub const GITHUB: &str = "github";
pub const GOOGLE: &str = "google";

const GITHUB_USER_RESOURCE: &str = "user";
const GOOGLE_USERINFO_RESOURCE: &str = "https://openidconnect.googleapis.com/v1/userinfo";

/// The `(field, value)` pair identifying a local account.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdentityClaim {
    pub field: String,
    pub value: String,
}

impl IdentityClaim {
    pub fn new(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }
}

#[async_trait]
pub trait IdentityExtractor: Send + Sync {
    /// # Errors
    /// Returns a `ProtocolError` if the provider cannot be queried or the
    /// expected attribute is absent.
    async fn extract(
        &self,
        client: &dyn OAuthClient,
        token: &OAuthToken,
    ) -> Result<IdentityClaim, ProtocolError>;
}

/// Fetch a JSON resource and use one of its string attributes as the claim.
#[derive(Clone, Debug)]
pub struct UserInfoClaim {
    resource: String,
    field: String,
}

impl UserInfoClaim {
    pub fn new(resource: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            field: field.into(),
        }
    }
}

#[async_trait]
impl IdentityExtractor for UserInfoClaim {
    async fn extract(
        &self,
        client: &dyn OAuthClient,
        token: &OAuthToken,
    ) -> Result<IdentityClaim, ProtocolError> {
        let profile = client.get(&self.resource, token).await?;
        profile
            .get(&self.field)
            .and_then(serde_json::Value::as_str)
            .filter(|value| !value.trim().is_empty())
            .map(|value| IdentityClaim::new(self.field.clone(), value))
            .ok_or_else(|| {
                ProtocolError::new(
                    "missing_identity",
                    format!("Provider profile has no {} attribute.", self.field),
                )
            })
    }
}

/// Everything the coordinator needs from a provider.
#[async_trait]
pub trait OAuthProvider: Send + Sync {
    fn name(&self) -> &str;

    fn client(&self) -> &dyn OAuthClient;

    /// # Errors
    /// Returns a `ProtocolError` if the identity cannot be fetched.
    async fn fetch_identity(&self, token: &OAuthToken) -> Result<IdentityClaim, ProtocolError>;

    /// Custom routing for handshake errors. Returning a location overrides the
    /// default flash-and-redirect behavior.
    fn on_handshake_error(&self, _error: &ProtocolError) -> Option<String> {
        None
    }
}

/// A bare registration: name, client and identity extractor.
pub struct Provider {
    name: String,
    client: Arc<dyn OAuthClient>,
    extractor: Arc<dyn IdentityExtractor>,
}

impl Provider {
    pub fn new(
        name: impl Into<String>,
        client: Arc<dyn OAuthClient>,
        extractor: Arc<dyn IdentityExtractor>,
    ) -> Self {
        Self {
            name: name.into(),
            client,
            extractor,
        }
    }
}

#[async_trait]
impl OAuthProvider for Provider {
    fn name(&self) -> &str {
        &self.name
    }

    fn client(&self) -> &dyn OAuthClient {
        self.client.as_ref()
    }

    async fn fetch_identity(&self, token: &OAuthToken) -> Result<IdentityClaim, ProtocolError> {
        self.extractor.extract(self.client.as_ref(), token).await
    }
}

/// GitHub: the `email` attribute of the authenticated user resource.
pub fn github(client: Arc<dyn OAuthClient>) -> Provider {
    Provider::new(
        GITHUB,
        client,
        Arc::new(UserInfoClaim::new(GITHUB_USER_RESOURCE, EMAIL_FIELD)),
    )
}

/// Google: the `email` claim of the OpenID userinfo endpoint.
pub fn google(client: Arc<dyn OAuthClient>) -> Provider {
    Provider::new(
        GOOGLE,
        client,
        Arc::new(UserInfoClaim::new(GOOGLE_USERINFO_RESOURCE, EMAIL_FIELD)),
    )
}
