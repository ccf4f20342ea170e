//! The start/callback state machine.

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::client::{CallbackParams, ProtocolError};
use super::config::{OAuthConfig, RedirectBehavior};
use super::handshake::{HandshakeState, safe_next};
use super::messages::{Message, MessageCatalog};
use super::provider::{IdentityClaim, OAuthProvider};
use super::registry::ProviderRegistry;
use crate::csrf::{self, CsrfConfig, CsrfError};
use crate::mfa::{MfaConfig, MfaState, PendingTwoFactor, TF_PENDING_KEY};
use crate::session::Session;
use crate::users::{UserStore, normalize_identity};

const FLASH_ERROR: &str = "error";

/// What the caller sent to the start endpoint.
#[derive(Clone, Debug, Default)]
pub struct StartRequest {
    pub next: Option<String>,
    /// The caller wants a JSON body instead of a redirect.
    pub api: bool,
    pub csrf_token: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StartOutcome {
    /// Send the caller to the provider's authorization endpoint.
    Provider { location: String },
    /// Browser caller is already logged in; no handshake was started.
    AlreadyAuthenticated { location: String },
    /// The library could not build the redirect.
    Failed {
        location: String,
        /// `None` when a provider hook chose the location.
        message: Option<String>,
    },
}

#[derive(Debug, Error)]
pub enum StartError {
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
    #[error("already authenticated")]
    AlreadyAuthenticated,
    #[error(transparent)]
    Csrf(#[from] CsrfError),
    #[error("failed to stash handshake: {0}")]
    Session(#[from] serde_json::Error),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CallbackOutcome {
    LoggedIn {
        user_id: Uuid,
        location: String,
    },
    TwoFactorRequired {
        user_id: Uuid,
        state: MfaState,
        location: String,
    },
    Failed {
        location: String,
        /// `None` when a provider hook chose the location.
        message: Option<String>,
    },
}

impl CallbackOutcome {
    #[must_use]
    pub fn location(&self) -> &str {
        match self {
            Self::LoggedIn { location, .. }
            | Self::TwoFactorRequired { location, .. }
            | Self::Failed { location, .. } => location,
        }
    }
}

#[derive(Debug, Error)]
pub enum CallbackError {
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
    #[error("user lookup failed")]
    UserStore(#[source] anyhow::Error),
    #[error("failed to stash two-factor state: {0}")]
    Session(#[from] serde_json::Error),
}

pub struct OAuthCoordinator {
    config: OAuthConfig,
    providers: ProviderRegistry,
    users: Arc<dyn UserStore>,
    csrf: CsrfConfig,
    mfa: MfaConfig,
    messages: MessageCatalog,
}

impl OAuthCoordinator {
    pub fn new(config: OAuthConfig, providers: ProviderRegistry, users: Arc<dyn UserStore>) -> Self {
        Self {
            config,
            providers,
            users,
            csrf: CsrfConfig::default(),
            mfa: MfaConfig::default(),
            messages: MessageCatalog::default(),
        }
    }

    #[must_use]
    pub fn with_csrf(mut self, csrf: CsrfConfig) -> Self {
        self.csrf = csrf;
        self
    }

    #[must_use]
    pub fn with_mfa(mut self, mfa: MfaConfig) -> Self {
        self.mfa = mfa;
        self
    }

    #[must_use]
    pub fn with_messages(mut self, messages: MessageCatalog) -> Self {
        self.messages = messages;
        self
    }

    #[must_use]
    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    #[must_use]
    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    #[must_use]
    pub fn users(&self) -> &Arc<dyn UserStore> {
        &self.users
    }

    #[must_use]
    pub fn csrf(&self) -> &CsrfConfig {
        &self.csrf
    }

    #[must_use]
    pub fn messages(&self) -> &MessageCatalog {
        &self.messages
    }

    /// Begin a handshake with `provider_name`.
    ///
    /// Nothing is written to the session unless the provider redirect was built.
    ///
    /// # Errors
    /// `UnknownProvider` (404), `Csrf` or API `AlreadyAuthenticated` (400), or
    /// `Session` if the handshake cannot be serialized.
    #[instrument(skip_all, fields(provider = %provider_name, api = request.api))]
    pub fn start(
        &self,
        provider_name: &str,
        request: &StartRequest,
        session: &mut Session,
    ) -> Result<StartOutcome, StartError> {
        let provider = self
            .providers
            .get(provider_name)
            .ok_or_else(|| StartError::UnknownProvider(provider_name.to_string()))?;

        let authenticated = session.is_authenticated();
        if self.csrf.requires_check(authenticated) {
            csrf::validate(session, request.csrf_token.as_deref())?;
        }

        if authenticated {
            debug!("start called with an authenticated session");
            if request.api {
                return Err(StartError::AlreadyAuthenticated);
            }
            return Ok(StartOutcome::AlreadyAuthenticated {
                location: self.config.post_login_view().to_string(),
            });
        }

        let callback_url = self.config.callback_url(provider_name);
        let authorization = match provider.client().authorize_redirect(&callback_url) {
            Ok(authorization) => authorization,
            Err(err) => {
                let (location, message) =
                    self.handshake_failure(provider.as_ref(), &err, request.api, session);
                return Ok(StartOutcome::Failed { location, message });
            }
        };

        HandshakeState {
            provider: provider_name.to_string(),
            state: authorization.state,
            next: safe_next(request.next.as_deref()),
            api: request.api,
        }
        .stash(session)?;

        info!("redirecting to provider");
        Ok(StartOutcome::Provider {
            location: authorization.url,
        })
    }

    /// Complete a handshake with the parameters the provider sent back.
    ///
    /// The stashed handshake is removed before anything else happens.
    ///
    /// # Errors
    /// `UnknownProvider` (404), `UserStore` when the lookup fails, or `Session`
    /// when the two-factor record cannot be stashed.
    #[instrument(skip_all, fields(provider = %provider_name))]
    pub async fn callback(
        &self,
        provider_name: &str,
        params: &CallbackParams,
        session: &mut Session,
    ) -> Result<CallbackOutcome, CallbackError> {
        let handshake =
            HandshakeState::take(session).filter(|handshake| handshake.provider == provider_name);

        let provider = self
            .providers
            .get(provider_name)
            .ok_or_else(|| CallbackError::UnknownProvider(provider_name.to_string()))?;

        let api = handshake.as_ref().is_some_and(|h| h.api)
            || self.config.redirect_behavior() == RedirectBehavior::Spa;
        let expected_state = handshake.as_ref().map(|h| h.state.as_str());
        let next = handshake.as_ref().and_then(|h| h.next.clone());

        let callback_url = self.config.callback_url(provider_name);
        let claim = match self
            .exchange(provider.as_ref(), params, expected_state, &callback_url)
            .await
        {
            Ok(claim) => claim,
            Err(err) => {
                let (location, message) =
                    self.handshake_failure(provider.as_ref(), &err, api, session);
                return Ok(CallbackOutcome::Failed { location, message });
            }
        };

        let value = normalize_identity(&claim.field, &claim.value);
        let user = self
            .users
            .find_by_identity(&claim.field, &value)
            .await
            .map_err(CallbackError::UserStore)?;

        let Some(user) = user else {
            info!(field = %claim.field, "identity not registered");
            let message = self.messages.identity_not_registered(&claim.value);
            let location = self.failure_location(&message, Some(&claim), api, session);
            return Ok(CallbackOutcome::Failed {
                location,
                message: Some(message),
            });
        };

        if !user.active {
            warn!(user_id = %user.id, "login attempt for disabled account");
            let message = self.messages.render(Message::DisabledAccount, &[]);
            let location = self.failure_location(&message, None, api, session);
            return Ok(CallbackOutcome::Failed {
                location,
                message: Some(message),
            });
        }

        if let Some((state, view)) = self.mfa.route(user.mfa_state) {
            info!(user_id = %user.id, mfa_state = state.as_str(), "second factor required");
            // A pending login never rides on another user's session.
            session.logout();
            session.insert(
                TF_PENDING_KEY,
                &PendingTwoFactor {
                    user_id: user.id,
                    state,
                    next,
                },
            )?;
            let location = if api {
                self.config
                    .ui_url(view, &[("tf_required", "1"), ("tf_state", state.as_str())])
            } else {
                view.to_string()
            };
            return Ok(CallbackOutcome::TwoFactorRequired {
                user_id: user.id,
                state,
                location,
            });
        }

        session.login(user.id);
        info!(user_id = %user.id, "oauth login succeeded");

        let location = if api {
            self.config.ui_url(
                self.config.post_oauth_login_view(),
                &[(claim.field.as_str(), claim.value.as_str())],
            )
        } else {
            next.unwrap_or_else(|| self.config.post_login_view().to_string())
        };
        Ok(CallbackOutcome::LoggedIn {
            user_id: user.id,
            location,
        })
    }

    async fn exchange(
        &self,
        provider: &dyn OAuthProvider,
        params: &CallbackParams,
        expected_state: Option<&str>,
        callback_url: &str,
    ) -> Result<IdentityClaim, ProtocolError> {
        let token = provider
            .client()
            .authorize_access_token(params, expected_state, callback_url)
            .await?;
        provider.fetch_identity(&token).await
    }

    /// Route a protocol error: the provider hook wins, otherwise the default
    /// handshake-error message is delivered.
    fn handshake_failure(
        &self,
        provider: &dyn OAuthProvider,
        err: &ProtocolError,
        api: bool,
        session: &mut Session,
    ) -> (String, Option<String>) {
        warn!(error = %err.error, description = %err.description, "oauth handshake failed");
        if let Some(location) = provider.on_handshake_error(err) {
            return (location, None);
        }
        let message = self.messages.handshake_error(&err.error, &err.description);
        let location = self.failure_location(&message, None, api, session);
        (location, Some(message))
    }

    /// Browser: flash and go to the login-error view. API: UI host with the
    /// message and the unmatched identity in the query.
    fn failure_location(
        &self,
        message: &str,
        claim: Option<&IdentityClaim>,
        api: bool,
        session: &mut Session,
    ) -> String {
        let view = self.config.login_error_view();
        if api {
            let mut query = vec![("error", message)];
            if let Some(claim) = claim {
                query.push((claim.field.as_str(), claim.value.as_str()));
            }
            self.config.ui_url(view, &query)
        } else {
            session.flash(FLASH_ERROR, message);
            view.to_string()
        }
    }
}

impl std::fmt::Debug for OAuthCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthCoordinator")
            .field("config", &self.config)
            .field("providers", &self.providers)
            .field("csrf", &self.csrf)
            .field("mfa", &self.mfa)
            .finish_non_exhaustive()
    }
}
