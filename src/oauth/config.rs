use anyhow::{Result, anyhow};
use url::form_urlencoded;

const DEFAULT_BASE_URL: &str = "http://localhost:8080";
const DEFAULT_START_PATH: &str = "/login/oauthstart";
const DEFAULT_RESPONSE_PATH: &str = "/login/oauthresponse";
const DEFAULT_POST_LOGIN_VIEW: &str = "/";
const DEFAULT_LOGIN_ERROR_VIEW: &str = "/login";

/// How results are delivered to API-driven callers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RedirectBehavior {
    /// Server-rendered pages; flashes plus local redirects.
    #[default]
    Classic,
    /// Redirects to an external UI host carrying results as query parameters.
    Spa,
}

impl RedirectBehavior {
    /// # Errors
    /// Returns an error for anything other than `classic` or `spa`.
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "classic" => Ok(Self::Classic),
            "spa" => Ok(Self::Spa),
            other => Err(anyhow!("invalid redirect behavior: {other}")),
        }
    }
}

#[derive(Clone, Debug)]
pub struct OAuthConfig {
    enabled: bool,
    base_url: String,
    start_path: String,
    response_path: String,
    post_login_view: String,
    login_error_view: String,
    post_oauth_login_view: Option<String>,
    redirect_behavior: RedirectBehavior,
    redirect_host: Option<String>,
}

impl OAuthConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            enabled: true,
            base_url: DEFAULT_BASE_URL.to_string(),
            start_path: DEFAULT_START_PATH.to_string(),
            response_path: DEFAULT_RESPONSE_PATH.to_string(),
            post_login_view: DEFAULT_POST_LOGIN_VIEW.to_string(),
            login_error_view: DEFAULT_LOGIN_ERROR_VIEW.to_string(),
            post_oauth_login_view: None,
            redirect_behavior: RedirectBehavior::Classic,
            redirect_host: None,
        }
    }

    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// External origin used to build callback URLs.
    #[must_use]
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub fn with_post_login_view(mut self, view: String) -> Self {
        self.post_login_view = view;
        self
    }

    #[must_use]
    pub fn with_login_error_view(mut self, view: String) -> Self {
        self.login_error_view = view;
        self
    }

    #[must_use]
    pub fn with_post_oauth_login_view(mut self, view: Option<String>) -> Self {
        self.post_oauth_login_view = view;
        self
    }

    #[must_use]
    pub fn with_redirect_behavior(mut self, behavior: RedirectBehavior) -> Self {
        self.redirect_behavior = behavior;
        self
    }

    /// UI origin (`host[:port]` or full URL) for API-driven redirects.
    #[must_use]
    pub fn with_redirect_host(mut self, host: Option<String>) -> Self {
        self.redirect_host = host;
        self
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[must_use]
    pub fn start_path(&self) -> &str {
        &self.start_path
    }

    #[must_use]
    pub fn response_path(&self) -> &str {
        &self.response_path
    }

    #[must_use]
    pub fn post_login_view(&self) -> &str {
        &self.post_login_view
    }

    #[must_use]
    pub fn login_error_view(&self) -> &str {
        &self.login_error_view
    }

    /// Falls back to the post-login view when unset.
    #[must_use]
    pub fn post_oauth_login_view(&self) -> &str {
        self.post_oauth_login_view
            .as_deref()
            .unwrap_or(&self.post_login_view)
    }

    #[must_use]
    pub fn redirect_behavior(&self) -> RedirectBehavior {
        self.redirect_behavior
    }

    #[must_use]
    pub fn redirect_host(&self) -> Option<&str> {
        self.redirect_host.as_deref()
    }

    /// Callback URL registered with the provider for `provider`.
    #[must_use]
    pub fn callback_url(&self, provider: &str) -> String {
        format!("{}{}/{provider}", self.base_url, self.response_path)
    }

    /// Local path of the start endpoint for `provider`.
    #[must_use]
    pub fn start_url(&self, provider: &str) -> String {
        format!("{}/{provider}", self.start_path)
    }

    /// Location on the UI host for `view` with the given query parameters.
    /// Without a redirect host the location stays relative to this service.
    #[must_use]
    pub fn ui_url(&self, view: &str, query: &[(&str, &str)]) -> String {
        let mut location = match self.redirect_host.as_deref() {
            Some(host) if host.contains("://") => format!("{}{view}", host.trim_end_matches('/')),
            Some(host) => format!("http://{}{view}", host.trim_end_matches('/')),
            None => view.to_string(),
        };
        if !query.is_empty() {
            let encoded = form_urlencoded::Serializer::new(String::new())
                .extend_pairs(query)
                .finish();
            location.push(if view.contains('?') { '&' } else { '?' });
            location.push_str(&encoded);
        }
        location
    }
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self::new()
    }
}
