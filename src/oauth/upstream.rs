//! `OAuthClient` backed by the `oauth2` crate for authorization-code providers.

use anyhow::{Context, Result};
use async_trait::async_trait;
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, EndpointNotSet, EndpointSet,
    RedirectUrl, RequestTokenError, Scope, TokenResponse, TokenUrl, basic::BasicClient,
};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::{debug, instrument};

use super::client::{AuthorizationRequest, CallbackParams, OAuthClient, OAuthToken, ProtocolError};

const GITHUB_AUTHORIZE_URL: &str = "https://github.com/login/oauth/authorize";
const GITHUB_TOKEN_URL: &str = "https://github.com/login/oauth/access_token";
const GITHUB_API_BASE_URL: &str = "https://api.github.com/";
const GOOGLE_AUTHORIZE_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

type ConfiguredClient =
    BasicClient<EndpointSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

#[derive(Clone, Debug)]
pub struct UpstreamClient {
    client_id: String,
    client_secret: SecretString,
    authorize_url: String,
    token_url: String,
    api_base_url: Option<String>,
    scopes: Vec<String>,
    http: reqwest::Client,
}

impl UpstreamClient {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        client_id: String,
        client_secret: SecretString,
        authorize_url: &str,
        token_url: &str,
    ) -> Result<Self> {
        // Token endpoints must answer directly; never follow redirects with a code.
        let http = reqwest::Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("failed to build OAuth HTTP client")?;
        Ok(Self {
            client_id,
            client_secret,
            authorize_url: authorize_url.to_string(),
            token_url: token_url.to_string(),
            api_base_url: None,
            scopes: Vec::new(),
            http,
        })
    }

    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn github(client_id: String, client_secret: SecretString) -> Result<Self> {
        Ok(
            Self::new(client_id, client_secret, GITHUB_AUTHORIZE_URL, GITHUB_TOKEN_URL)?
                .with_api_base_url(GITHUB_API_BASE_URL)
                .with_scopes(&["user:email"]),
        )
    }

    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn google(client_id: String, client_secret: SecretString) -> Result<Self> {
        Ok(
            Self::new(client_id, client_secret, GOOGLE_AUTHORIZE_URL, GOOGLE_TOKEN_URL)?
                .with_scopes(&["openid", "email", "profile"]),
        )
    }

    /// Base URL that relative resources passed to `get` are joined onto.
    #[must_use]
    pub fn with_api_base_url(mut self, url: &str) -> Self {
        self.api_base_url = Some(url.to_string());
        self
    }

    #[must_use]
    pub fn with_scopes(mut self, scopes: &[&str]) -> Self {
        self.scopes = scopes.iter().map(ToString::to_string).collect();
        self
    }

    fn client(&self, redirect_uri: &str) -> Result<ConfiguredClient, ProtocolError> {
        let auth_url = AuthUrl::new(self.authorize_url.clone())
            .map_err(|e| ProtocolError::new("invalid_request", e.to_string()))?;
        let token_url = TokenUrl::new(self.token_url.clone())
            .map_err(|e| ProtocolError::new("invalid_request", e.to_string()))?;
        let redirect_url = RedirectUrl::new(redirect_uri.to_string())
            .map_err(|e| ProtocolError::new("invalid_request", e.to_string()))?;

        Ok(BasicClient::new(ClientId::new(self.client_id.clone()))
            .set_client_secret(ClientSecret::new(
                self.client_secret.expose_secret().to_string(),
            ))
            .set_auth_uri(auth_url)
            .set_token_uri(token_url)
            .set_redirect_uri(redirect_url))
    }

    fn resource_url(&self, resource: &str) -> Result<String, ProtocolError> {
        if resource.starts_with("https://") || resource.starts_with("http://") {
            return Ok(resource.to_string());
        }
        let base = self
            .api_base_url
            .as_deref()
            .ok_or_else(|| ProtocolError::new("invalid_request", "no API base URL configured"))?;
        url::Url::parse(base)
            .and_then(|base| base.join(resource))
            .map(String::from)
            .map_err(|e| ProtocolError::new("invalid_request", e.to_string()))
    }
}

/// Check what the provider sent back before any exchange happens and return
/// the authorization code.
///
/// A provider-reported error wins over everything else; then the state must
/// match the stashed one.
pub(crate) fn check_callback<'a>(
    params: &'a CallbackParams,
    expected_state: Option<&str>,
) -> Result<&'a str, ProtocolError> {
    if let Some(error) = params.get("error") {
        return Err(ProtocolError::new(
            error,
            params.get("error_description").unwrap_or_default(),
        ));
    }
    match (expected_state, params.get("state")) {
        (Some(expected), Some(received)) if expected == received => {}
        _ => return Err(ProtocolError::mismatching_state()),
    }
    params
        .get("code")
        .filter(|code| !code.is_empty())
        .ok_or_else(|| ProtocolError::new("invalid_request", "Missing authorization code."))
}

#[async_trait]
impl OAuthClient for UpstreamClient {
    fn authorize_redirect(&self, redirect_uri: &str) -> Result<AuthorizationRequest, ProtocolError> {
        let client = self.client(redirect_uri)?;
        let mut request = client.authorize_url(CsrfToken::new_random);
        for scope in &self.scopes {
            request = request.add_scope(Scope::new(scope.clone()));
        }
        let (url, state) = request.url();
        Ok(AuthorizationRequest {
            url: url.to_string(),
            state: state.secret().clone(),
        })
    }

    #[instrument(skip_all)]
    async fn authorize_access_token(
        &self,
        params: &CallbackParams,
        expected_state: Option<&str>,
        redirect_uri: &str,
    ) -> Result<OAuthToken, ProtocolError> {
        let code = check_callback(params, expected_state)?;
        let client = self.client(redirect_uri)?;

        let response = client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .request_async(&self.http)
            .await
            .map_err(|err| match err {
                RequestTokenError::ServerResponse(response) => ProtocolError::new(
                    response.error().to_string(),
                    response.error_description().cloned().unwrap_or_default(),
                ),
                other => ProtocolError::new("token_exchange_failed", other.to_string()),
            })?;

        debug!("token exchange succeeded");
        Ok(OAuthToken::new(response.access_token().secret().clone()))
    }

    #[instrument(skip(self, token))]
    async fn get(&self, resource: &str, token: &OAuthToken) -> Result<Value, ProtocolError> {
        let url = self.resource_url(resource)?;
        let response = self
            .http
            .get(url)
            .bearer_auth(token.access_token.expose_secret())
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| ProtocolError::new("request_failed", e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProtocolError::new(
                "request_failed",
                format!("resource request returned {status}"),
            ));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| ProtocolError::new("invalid_response", e.to_string()))
    }
}
