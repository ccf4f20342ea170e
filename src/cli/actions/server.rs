use crate::{
    api::{self, AppState},
    cli::{
        commands::{oauth, providers},
        telemetry,
    },
    csrf::CsrfConfig,
    mfa::MfaConfig,
    oauth::{OAuthConfig, OAuthCoordinator, ProviderRegistry, UpstreamClient, github, google},
    session::{MemorySessionStore, SessionConfig},
    users::{MemoryUserStore, PgUserStore, UserStore},
};
use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tracing::{info, warn};
use url::Url;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: Option<String>,
    pub oauth: oauth::Options,
    pub providers: providers::Options,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the user store or a provider client cannot be set up,
/// or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let users = user_store(args.dsn.as_deref()).await?;
    let registry = provider_registry(&args.providers)?;
    if registry.is_empty() {
        warn!("No OAuth provider credentials configured; every start request will 404");
    }

    let coordinator = coordinator(&args.oauth, registry, users);
    let session_config = SessionConfig::new()
        .with_ttl_seconds(args.oauth.session_ttl_seconds)
        .with_cookie_secure(args.oauth.cookie_secure)
        .with_same_site(args.oauth.cookie_same_site);
    let sessions = Arc::new(MemorySessionStore::new(Duration::from_secs(
        args.oauth.session_ttl_seconds,
    )));
    let state = AppState::new(Arc::new(coordinator), sessions, session_config);

    let result = api::serve(args.port, Arc::new(state)).await;
    telemetry::shutdown_tracer();
    result
}

async fn user_store(dsn: Option<&str>) -> Result<Arc<dyn UserStore>> {
    let Some(dsn) = dsn else {
        warn!("No --dsn given; using an empty in-memory user store");
        return Ok(Arc::new(MemoryUserStore::new()));
    };

    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(dsn)
        .await
        .context("Failed to connect to database")?;
    Ok(Arc::new(PgUserStore::new(pool)))
}

fn provider_registry(options: &providers::Options) -> Result<ProviderRegistry> {
    let mut registry = ProviderRegistry::new();
    if let Some(creds) = &options.github {
        let client = UpstreamClient::github(creds.client_id.clone(), creds.client_secret.clone())?;
        registry.register_provider_ext(Arc::new(github(Arc::new(client))));
    }
    if let Some(creds) = &options.google {
        let client = UpstreamClient::google(creds.client_id.clone(), creds.client_secret.clone())?;
        registry.register_provider_ext(Arc::new(google(Arc::new(client))));
    }
    Ok(registry)
}

fn coordinator(
    options: &oauth::Options,
    providers: ProviderRegistry,
    users: Arc<dyn UserStore>,
) -> OAuthCoordinator {
    let config = OAuthConfig::new()
        .with_enabled(options.enabled)
        .with_base_url(options.base_url.clone())
        .with_post_login_view(options.post_login_view.clone())
        .with_login_error_view(options.login_error_view.clone())
        .with_post_oauth_login_view(options.post_oauth_login_view.clone())
        .with_redirect_behavior(options.redirect_behavior)
        .with_redirect_host(options.redirect_host.clone());
    let csrf = CsrfConfig::new()
        .with_enabled(options.csrf_protect)
        .with_ignore_unauth_endpoints(options.csrf_ignore_unauth_endpoints);
    let mfa = MfaConfig::new()
        .with_required(options.tf_required)
        .with_setup_view(options.tf_setup_view.clone())
        .with_verify_view(options.tf_verify_view.clone());

    OAuthCoordinator::new(config, providers, users)
        .with_csrf(csrf)
        .with_mfa(mfa)
}

fn log_startup_args(args: &Args) {
    let mut providers = Vec::new();
    if args.providers.github.is_some() {
        providers.push("github");
    }
    if args.providers.google.is_some() {
        providers.push("google");
    }
    let entries = [
        ("listen", format!("tcp:{}", args.port)),
        (
            "dsn",
            args.dsn
                .as_deref()
                .map_or_else(|| "memory".to_string(), redact_dsn),
        ),
        ("base_url", args.oauth.base_url.clone()),
        ("oauth_enabled", args.oauth.enabled.to_string()),
        (
            "redirect_behavior",
            format!("{:?}", args.oauth.redirect_behavior).to_lowercase(),
        ),
        (
            "redirect_host",
            args.oauth
                .redirect_host
                .clone()
                .unwrap_or_else(|| "none".to_string()),
        ),
        ("csrf_protect", args.oauth.csrf_protect.to_string()),
        ("tf_required", args.oauth.tf_required.to_string()),
        ("cookie_same_site", args.oauth.cookie_same_site.as_str().to_string()),
        ("providers", providers.join(",")),
    ];

    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = format!(
        "{} {} - {}\n\nStartup configuration:",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        short_commit(crate::GIT_COMMIT_HASH)
    );
    for (key, value) in &entries {
        let padding = " ".repeat(max_key_len.saturating_sub(key.len()));
        let _ =
            std::fmt::Write::write_fmt(&mut message, format_args!("\n  {key}:{padding} {value}"));
    }
    info!("{message}");
}

fn redact_dsn(dsn: &str) -> String {
    match Url::parse(dsn) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("REDACTED"));
            }
            parsed.to_string()
        }
        Err(_) => "invalid-dsn".to_string(),
    }
}

fn short_commit(hash: &str) -> &str {
    let trimmed = hash.trim();
    trimmed.get(..7).unwrap_or(trimmed)
}
