use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError,
    atomic::{AtomicUsize, Ordering},
};
use url::form_urlencoded;
use uuid::Uuid;

use super::*;
use crate::csrf::{self, CsrfConfig, CsrfError};
use crate::mfa::{MfaConfig, MfaState, PendingTwoFactor, TF_PENDING_KEY};
use crate::session::Session;
use crate::users::{MemoryUserStore, UserRecord};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Stand-in for the OAuth library. The authorization URL points at
/// `/whatever` and carries the callback so tests can follow it.
pub(crate) struct MockClient {
    identity: Mutex<String>,
    exchange_error: Mutex<Option<ProtocolError>>,
    redirect_error: Mutex<Option<ProtocolError>>,
    expected_states: Mutex<Vec<Option<String>>>,
    counter: AtomicUsize,
}

impl MockClient {
    pub(crate) fn new(email: &str) -> Self {
        Self {
            identity: Mutex::new(email.to_string()),
            exchange_error: Mutex::new(None),
            redirect_error: Mutex::new(None),
            expected_states: Mutex::new(Vec::new()),
            counter: AtomicUsize::new(0),
        }
    }

    pub(crate) fn set_identity(&self, email: &str) {
        *lock(&self.identity) = email.to_string();
    }

    pub(crate) fn set_exchange_error(&self, error: Option<ProtocolError>) {
        *lock(&self.exchange_error) = error;
    }

    pub(crate) fn set_redirect_error(&self, error: Option<ProtocolError>) {
        *lock(&self.redirect_error) = error;
    }

    pub(crate) fn expected_states(&self) -> Vec<Option<String>> {
        lock(&self.expected_states).clone()
    }
}

#[async_trait]
impl OAuthClient for MockClient {
    fn authorize_redirect(&self, redirect_uri: &str) -> Result<AuthorizationRequest, ProtocolError> {
        if let Some(err) = lock(&self.redirect_error).clone() {
            return Err(err);
        }
        let state = format!("state-{}", self.counter.fetch_add(1, Ordering::SeqCst));
        let query = form_urlencoded::Serializer::new(String::new())
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("state", &state)
            .finish();
        Ok(AuthorizationRequest {
            url: format!("/whatever?{query}"),
            state,
        })
    }

    async fn authorize_access_token(
        &self,
        _params: &CallbackParams,
        expected_state: Option<&str>,
        _redirect_uri: &str,
    ) -> Result<OAuthToken, ProtocolError> {
        lock(&self.expected_states).push(expected_state.map(ToString::to_string));
        match lock(&self.exchange_error).clone() {
            Some(err) => Err(err),
            None => Ok(OAuthToken::new("token")),
        }
    }

    async fn get(&self, resource: &str, _token: &OAuthToken) -> Result<Value, ProtocolError> {
        if resource == "user" {
            Ok(json!({ "email": lock(&self.identity).clone() }))
        } else {
            Err(ProtocolError::new("not_found", resource))
        }
    }
}

/// Provider object with its own failure routing.
struct UhOhProvider {
    client: Arc<MockClient>,
    extractor: UserInfoClaim,
}

#[async_trait]
impl OAuthProvider for UhOhProvider {
    fn name(&self) -> &str {
        "myoauth"
    }

    fn client(&self) -> &dyn OAuthClient {
        self.client.as_ref()
    }

    async fn fetch_identity(&self, token: &OAuthToken) -> Result<IdentityClaim, ProtocolError> {
        self.extractor.extract(self.client.as_ref(), token).await
    }

    fn on_handshake_error(&self, _error: &ProtocolError) -> Option<String> {
        Some("/uh-oh".to_string())
    }
}

pub(crate) struct Fixture {
    pub(crate) coordinator: OAuthCoordinator,
    pub(crate) client: Arc<MockClient>,
    pub(crate) matt: Uuid,
}

pub(crate) async fn fixture_with(
    config: OAuthConfig,
    csrf: CsrfConfig,
    mfa: MfaConfig,
) -> Fixture {
    fixture_with_providers(config, csrf, mfa, &[]).await
}

/// `github` plus `extra` providers, all backed by the same mock client.
pub(crate) async fn fixture_with_providers(
    config: OAuthConfig,
    csrf: CsrfConfig,
    mfa: MfaConfig,
    extra: &[&str],
) -> Fixture {
    let users = Arc::new(MemoryUserStore::new());
    let matt = UserRecord::new("matt@lp.com").with_username("matt");
    let matt_id = matt.id;
    users.insert(matt).await;
    users
        .insert(UserRecord::new("gone@lp.com").with_active(false))
        .await;
    users
        .insert(UserRecord::new("tf@lp.com").with_mfa_state(MfaState::Enabled))
        .await;

    let client = Arc::new(MockClient::new("matt@lp.com"));
    let mut providers = ProviderRegistry::new();
    providers.register_provider_ext(Arc::new(github(client.clone())));
    for name in extra {
        providers.register_provider(
            name,
            client.clone(),
            Arc::new(UserInfoClaim::new("user", "email")),
        );
    }

    let coordinator = OAuthCoordinator::new(config, providers, users)
        .with_csrf(csrf)
        .with_mfa(mfa);
    Fixture {
        coordinator,
        client,
        matt: matt_id,
    }
}

async fn fixture(config: OAuthConfig) -> Fixture {
    fixture_with(config, CsrfConfig::default(), MfaConfig::default()).await
}

fn classic() -> OAuthConfig {
    OAuthConfig::new().with_post_login_view("/post_login".to_string())
}

fn spa() -> OAuthConfig {
    OAuthConfig::new()
        .with_redirect_behavior(RedirectBehavior::Spa)
        .with_redirect_host(Some("myui.com:8090".to_string()))
        .with_login_error_view("/login-error".to_string())
        .with_post_oauth_login_view(Some("/post-login".to_string()))
}

fn browser(next: Option<&str>) -> StartRequest {
    StartRequest {
        next: next.map(ToString::to_string),
        ..StartRequest::default()
    }
}

fn query_of(location: &str) -> Vec<(String, String)> {
    location
        .split_once('?')
        .map(|(_, query)| form_urlencoded::parse(query.as_bytes()).into_owned().collect())
        .unwrap_or_default()
}

fn query_value(location: &str, key: &str) -> Option<String> {
    query_of(location)
        .into_iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v)
}

#[test]
fn registering_same_name_replaces_in_place() {
    let first = Arc::new(MockClient::new("a@lp.com"));
    let second = Arc::new(MockClient::new("b@lp.com"));
    let extractor = Arc::new(UserInfoClaim::new("user", "email"));

    let mut registry = ProviderRegistry::new();
    registry.register_provider("github", first, extractor.clone());
    registry.register_provider("myoauth", second.clone(), extractor.clone());
    registry.register_provider("github", second, extractor);

    assert_eq!(registry.len(), 2);
    assert_eq!(registry.names(), vec!["github", "myoauth"]);
    assert!(registry.get("google").is_none());
}

#[tokio::test]
async fn start_stashes_handshake_and_redirects() -> Result<()> {
    let fx = fixture(classic()).await;
    let mut session = Session::new();

    let outcome = fx
        .coordinator
        .start("github", &browser(Some("/profile")), &mut session)?;
    let StartOutcome::Provider { location } = outcome else {
        return Err(anyhow!("expected provider redirect, got {outcome:?}"));
    };
    assert!(location.starts_with("/whatever"));
    assert_eq!(
        query_value(&location, "redirect_uri").as_deref(),
        Some("http://localhost:8080/login/oauthresponse/github")
    );

    let handshake = HandshakeState::peek(&session).ok_or_else(|| anyhow!("no handshake"))?;
    assert_eq!(handshake.provider, "github");
    assert_eq!(handshake.state, "state-0");
    assert_eq!(handshake.next.as_deref(), Some("/profile"));
    assert!(!handshake.api);
    Ok(())
}

#[tokio::test]
async fn unknown_provider_is_not_found_on_both_steps() -> Result<()> {
    let fx = fixture(classic()).await;
    let mut session = Session::new();

    let result = fx.coordinator.start("foobar", &browser(None), &mut session);
    assert!(matches!(result, Err(StartError::UnknownProvider(ref name)) if name == "foobar"));
    assert!(!session.is_modified());

    let result = fx
        .coordinator
        .callback("foobar", &CallbackParams::default(), &mut session)
        .await;
    assert!(matches!(result, Err(CallbackError::UnknownProvider(_))));
    Ok(())
}

#[tokio::test]
async fn callback_logs_in_and_consumes_next_once() -> Result<()> {
    let fx = fixture(classic()).await;
    let mut session = Session::new();
    fx.coordinator
        .start("github", &browser(Some("/profile")), &mut session)?;

    let outcome = fx
        .coordinator
        .callback("github", &CallbackParams::default(), &mut session)
        .await?;
    assert_eq!(
        outcome,
        CallbackOutcome::LoggedIn {
            user_id: fx.matt,
            location: "/profile".to_string(),
        }
    );
    assert_eq!(session.user_id(), Some(fx.matt));
    assert!(session.is_renewed());
    assert!(!session.contains(HANDSHAKE_KEY));
    assert_eq!(fx.client.expected_states(), vec![Some("state-0".to_string())]);

    // A replayed callback sees no stashed state or destination.
    let outcome = fx
        .coordinator
        .callback("github", &CallbackParams::default(), &mut session)
        .await?;
    assert_eq!(outcome.location(), "/post_login");
    assert_eq!(fx.client.expected_states().last(), Some(&None));
    Ok(())
}

#[tokio::test]
async fn second_start_overwrites_first_handshake() -> Result<()> {
    let fx = fixture(classic()).await;
    let mut session = Session::new();
    fx.coordinator
        .start("github", &browser(Some("/first")), &mut session)?;
    fx.coordinator.start("github", &browser(None), &mut session)?;

    let outcome = fx
        .coordinator
        .callback("github", &CallbackParams::default(), &mut session)
        .await?;
    assert_eq!(outcome.location(), "/post_login");
    assert_eq!(fx.client.expected_states(), vec![Some("state-1".to_string())]);
    Ok(())
}

#[tokio::test]
async fn unsafe_next_is_dropped() -> Result<()> {
    let fx = fixture(classic()).await;
    let mut session = Session::new();
    fx.coordinator.start(
        "github",
        &browser(Some("https://evil.example/")),
        &mut session,
    )?;
    let handshake = HandshakeState::peek(&session).ok_or_else(|| anyhow!("no handshake"))?;
    assert_eq!(handshake.next, None);
    Ok(())
}

#[tokio::test]
async fn already_authenticated_browser_redirects_api_rejects() -> Result<()> {
    let fx = fixture(classic()).await;
    let mut session = Session::new();
    session.login(fx.matt);

    let outcome = fx.coordinator.start("github", &browser(None), &mut session)?;
    assert_eq!(
        outcome,
        StartOutcome::AlreadyAuthenticated {
            location: "/post_login".to_string()
        }
    );
    assert!(!session.contains(HANDSHAKE_KEY));

    let api = StartRequest {
        api: true,
        ..StartRequest::default()
    };
    let result = fx.coordinator.start("github", &api, &mut session);
    assert!(matches!(result, Err(StartError::AlreadyAuthenticated)));
    assert!(!session.contains(HANDSHAKE_KEY));
    Ok(())
}

#[tokio::test]
async fn csrf_is_required_unless_unauth_endpoints_are_exempt() -> Result<()> {
    let strict = CsrfConfig::new().with_enabled(true);
    let fx = fixture_with(classic(), strict, MfaConfig::default()).await;
    let mut session = Session::new();

    let result = fx.coordinator.start("github", &browser(None), &mut session);
    assert!(matches!(result, Err(StartError::Csrf(CsrfError::Missing))));
    assert!(!session.contains(HANDSHAKE_KEY));

    let token = csrf::issue_token(&mut session)?;
    let forged = StartRequest {
        csrf_token: Some("forged".to_string()),
        ..StartRequest::default()
    };
    let result = fx.coordinator.start("github", &forged, &mut session);
    assert!(matches!(result, Err(StartError::Csrf(CsrfError::Invalid))));

    let valid = StartRequest {
        csrf_token: Some(token),
        ..StartRequest::default()
    };
    let outcome = fx.coordinator.start("github", &valid, &mut session)?;
    assert!(matches!(outcome, StartOutcome::Provider { .. }));

    let relaxed = strict.with_ignore_unauth_endpoints(true);
    let fx = fixture_with(classic(), relaxed, MfaConfig::default()).await;
    let mut session = Session::new();
    let outcome = fx.coordinator.start("github", &browser(None), &mut session)?;
    assert!(matches!(outcome, StartOutcome::Provider { .. }));
    Ok(())
}

#[tokio::test]
async fn redirect_failure_writes_no_state() -> Result<()> {
    let fx = fixture(classic()).await;
    fx.client
        .set_redirect_error(Some(ProtocolError::new("invalid_request", "bad callback")));
    let mut session = Session::new();

    let outcome = fx.coordinator.start("github", &browser(None), &mut session)?;
    assert_eq!(
        outcome,
        StartOutcome::Failed {
            location: "/login".to_string(),
            message: Some(
                "An error occurred while communicating with the Oauth provider: (invalid_request - bad callback). Please try again."
                    .to_string()
            ),
        }
    );
    assert!(!session.contains(HANDSHAKE_KEY));
    assert_eq!(session.take_flashes().len(), 1);
    Ok(())
}

#[tokio::test]
async fn protocol_error_flashes_exact_library_pair() -> Result<()> {
    let fx = fixture(classic()).await;
    let mut session = Session::new();
    fx.coordinator.start("github", &browser(None), &mut session)?;
    fx.client
        .set_exchange_error(Some(ProtocolError::mismatching_state()));

    let outcome = fx
        .coordinator
        .callback("github", &CallbackParams::default(), &mut session)
        .await?;
    let expected = "An error occurred while communicating with the Oauth provider: (mismatching_state - CSRF Warning! State not equal in request and response.). Please try again.";
    assert_eq!(
        outcome,
        CallbackOutcome::Failed {
            location: "/login".to_string(),
            message: Some(expected.to_string()),
        }
    );
    assert!(!session.contains(HANDSHAKE_KEY));
    assert!(!session.is_authenticated());

    let flashes = session.take_flashes();
    assert_eq!(flashes.len(), 1);
    assert_eq!(flashes[0].category, "error");
    assert_eq!(flashes[0].message, expected);
    Ok(())
}

#[tokio::test]
async fn unknown_identity_names_the_literal_value() -> Result<()> {
    let fx = fixture(classic()).await;
    fx.client.set_identity("jwag@lp.com");
    let mut session = Session::new();

    let outcome = fx
        .coordinator
        .callback("github", &CallbackParams::default(), &mut session)
        .await?;
    assert_eq!(
        outcome,
        CallbackOutcome::Failed {
            location: "/login".to_string(),
            message: Some("Identity jwag@lp.com not registered".to_string()),
        }
    );
    assert_eq!(
        session.take_flashes()[0].message,
        "Identity jwag@lp.com not registered"
    );
    Ok(())
}

#[tokio::test]
async fn identity_is_normalized_before_lookup() -> Result<()> {
    let fx = fixture(classic()).await;
    fx.client.set_identity("  Matt@LP.com ");
    let mut session = Session::new();

    let outcome = fx
        .coordinator
        .callback("github", &CallbackParams::default(), &mut session)
        .await?;
    assert!(matches!(outcome, CallbackOutcome::LoggedIn { user_id, .. } if user_id == fx.matt));
    Ok(())
}

#[tokio::test]
async fn disabled_account_is_rejected() -> Result<()> {
    let fx = fixture(classic()).await;
    fx.client.set_identity("gone@lp.com");
    let mut session = Session::new();

    let outcome = fx
        .coordinator
        .callback("github", &CallbackParams::default(), &mut session)
        .await?;
    assert_eq!(
        outcome,
        CallbackOutcome::Failed {
            location: "/login".to_string(),
            message: Some("Account is disabled.".to_string()),
        }
    );
    assert!(!session.is_authenticated());
    Ok(())
}

#[tokio::test]
async fn spa_routes_results_to_ui_host() -> Result<()> {
    let fx = fixture(spa()).await;
    let mut session = Session::new();
    let api = StartRequest {
        api: true,
        ..StartRequest::default()
    };
    fx.coordinator.start("github", &api, &mut session)?;

    let outcome = fx
        .coordinator
        .callback("github", &CallbackParams::default(), &mut session)
        .await?;
    let location = outcome.location();
    assert!(location.starts_with("http://myui.com:8090/post-login?"));
    assert_eq!(query_value(location, "email").as_deref(), Some("matt@lp.com"));

    // Unknown user: error message plus the unmatched identity.
    let mut session = Session::new();
    fx.client.set_identity("jwag@lp.com");
    let outcome = fx
        .coordinator
        .callback("github", &CallbackParams::default(), &mut session)
        .await?;
    let location = outcome.location();
    assert!(location.starts_with("http://myui.com:8090/login-error?"));
    assert_eq!(
        query_value(location, "error").as_deref(),
        Some("Identity jwag@lp.com not registered")
    );
    assert_eq!(query_value(location, "email").as_deref(), Some("jwag@lp.com"));
    assert!(session.take_flashes().is_empty());

    // Protocol error: same view, handshake message.
    fx.client
        .set_exchange_error(Some(ProtocolError::mismatching_state()));
    let outcome = fx
        .coordinator
        .callback("github", &CallbackParams::default(), &mut session)
        .await?;
    assert_eq!(
        query_value(outcome.location(), "error"),
        Some(
            fx.coordinator
                .messages()
                .handshake_error(
                    "mismatching_state",
                    "CSRF Warning! State not equal in request and response."
                )
        )
    );
    Ok(())
}

#[tokio::test]
async fn provider_hook_overrides_failure_routing() -> Result<()> {
    let mut fx = fixture(classic()).await;
    let client = Arc::new(MockClient::new("matt@lp.com"));
    let mut providers = fx.coordinator.providers().clone();
    providers.register_provider_ext(Arc::new(UhOhProvider {
        client: client.clone(),
        extractor: UserInfoClaim::new("user", "email"),
    }));
    fx.coordinator = OAuthCoordinator::new(
        classic(),
        providers,
        fx.coordinator.users().clone(),
    );

    let mut session = Session::new();
    let outcome = fx.coordinator.start("myoauth", &browser(None), &mut session)?;
    assert!(matches!(outcome, StartOutcome::Provider { .. }));

    client.set_exchange_error(Some(ProtocolError::mismatching_state()));
    let outcome = fx
        .coordinator
        .callback("myoauth", &CallbackParams::default(), &mut session)
        .await?;
    assert_eq!(
        outcome,
        CallbackOutcome::Failed {
            location: "/uh-oh".to_string(),
            message: None,
        }
    );
    assert!(session.take_flashes().is_empty());
    assert!(!session.contains(HANDSHAKE_KEY));
    Ok(())
}

#[tokio::test]
async fn two_factor_users_are_routed_to_verification() -> Result<()> {
    let fx = fixture(classic()).await;
    fx.client.set_identity("tf@lp.com");
    let mut session = Session::new();
    fx.coordinator
        .start("github", &browser(Some("/profile")), &mut session)?;

    let outcome = fx
        .coordinator
        .callback("github", &CallbackParams::default(), &mut session)
        .await?;
    let CallbackOutcome::TwoFactorRequired {
        user_id,
        state,
        location,
    } = outcome
    else {
        return Err(anyhow!("expected two-factor routing, got {outcome:?}"));
    };
    assert_eq!(state, MfaState::Enabled);
    assert_eq!(location, "/tf-validate");
    assert!(!session.is_authenticated());
    assert!(session.is_renewed());

    let pending: PendingTwoFactor = session
        .get(TF_PENDING_KEY)
        .ok_or_else(|| anyhow!("no pending two-factor record"))?;
    assert_eq!(pending.user_id, user_id);
    assert_eq!(pending.next.as_deref(), Some("/profile"));
    Ok(())
}

#[tokio::test]
async fn two_factor_login_drops_the_previous_user() -> Result<()> {
    let fx = fixture(classic()).await;
    let mut session = Session::new();
    session.login(fx.matt);
    csrf::issue_token(&mut session)?;

    fx.client.set_identity("tf@lp.com");
    let outcome = fx
        .coordinator
        .callback("github", &CallbackParams::default(), &mut session)
        .await?;
    assert!(matches!(outcome, CallbackOutcome::TwoFactorRequired { .. }));
    assert_eq!(session.user_id(), None);
    assert!(session.is_renewed());
    assert!(session.contains(TF_PENDING_KEY));
    assert_eq!(csrf::validate(&session, Some("anything")), Err(CsrfError::Invalid));
    Ok(())
}

#[tokio::test]
async fn login_mints_a_fresh_csrf_token() -> Result<()> {
    let fx = fixture(classic()).await;
    let mut session = Session::new();
    let before = csrf::issue_token(&mut session)?;
    fx.coordinator.start("github", &browser(None), &mut session)?;

    fx.coordinator
        .callback("github", &CallbackParams::default(), &mut session)
        .await?;
    assert_eq!(session.user_id(), Some(fx.matt));
    assert_eq!(csrf::validate(&session, Some(&before)), Err(CsrfError::Invalid));

    let after = csrf::issue_token(&mut session)?;
    assert_ne!(before, after);
    assert_eq!(csrf::validate(&session, Some(&after)), Ok(()));
    Ok(())
}

#[tokio::test]
async fn required_two_factor_sends_unenrolled_users_to_setup() -> Result<()> {
    let mfa = MfaConfig::new().with_required(true);
    let fx = fixture_with(spa(), CsrfConfig::default(), mfa).await;
    let mut session = Session::new();

    let outcome = fx
        .coordinator
        .callback("github", &CallbackParams::default(), &mut session)
        .await?;
    let location = outcome.location();
    assert!(location.starts_with("http://myui.com:8090/tf-setup?"));
    assert_eq!(query_value(location, "tf_required").as_deref(), Some("1"));
    assert_eq!(
        query_value(location, "tf_state").as_deref(),
        Some("required_unenrolled")
    );
    Ok(())
}
