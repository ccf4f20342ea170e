use anyhow::{Context, Result};
use axum::{
    Extension, Router,
    body::Body,
    extract::MatchedPath,
    http::{
        HeaderName, HeaderValue, Method, Request,
        header::{ACCEPT, CONTENT_TYPE},
    },
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{Span, info, info_span, warn};
use ulid::Ulid;
use url::Url;
use utoipa_axum::router::OpenApiRouter;

use crate::csrf::CSRF_HEADER;
use crate::oauth::OAuthCoordinator;
use crate::session::{SessionConfig, SessionStore};

pub(crate) mod handlers;
mod openapi;

pub use openapi::openapi;

/// Shared state handed to every handler through an `Extension`.
pub struct AppState {
    coordinator: Arc<OAuthCoordinator>,
    sessions: Arc<dyn SessionStore>,
    session_config: SessionConfig,
}

impl AppState {
    pub fn new(
        coordinator: Arc<OAuthCoordinator>,
        sessions: Arc<dyn SessionStore>,
        session_config: SessionConfig,
    ) -> Self {
        Self {
            coordinator,
            sessions,
            session_config,
        }
    }

    #[must_use]
    pub fn coordinator(&self) -> &OAuthCoordinator {
        &self.coordinator
    }

    #[must_use]
    pub fn sessions(&self) -> &dyn SessionStore {
        self.sessions.as_ref()
    }

    #[must_use]
    pub fn session_config(&self) -> &SessionConfig {
        &self.session_config
    }
}

/// Build the API router with all documented routes registered.
#[must_use]
pub fn router() -> OpenApiRouter {
    openapi::api_router()
}

/// The full application: documented routes plus request id, tracing and CORS
/// layers.
pub fn app(state: Arc<AppState>) -> Router {
    let (router, _openapi) = router().split_for_parts();

    let cors = state
        .coordinator()
        .config()
        .redirect_host()
        .and_then(|host| match ui_origin(host) {
            Ok(origin) => Some(origin),
            Err(err) => {
                warn!("CORS disabled: {err:#}");
                None
            }
        })
        .map(|origin| {
            CorsLayer::new()
                .allow_headers([
                    CONTENT_TYPE,
                    ACCEPT,
                    HeaderName::from_static(CSRF_HEADER),
                ])
                .allow_methods([Method::GET, Method::POST])
                .allow_origin(AllowOrigin::exact(origin))
                .allow_credentials(true)
        });

    router
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .option_layer(cors)
                .layer(Extension(state)),
        )
}

/// Start the server
/// # Errors
/// Return error if failed to bind or serve
pub async fn serve(port: u16, state: Arc<AppState>) -> Result<()> {
    let app = app(state);

    let listener = TcpListener::bind(format!("::0:{port}"))
        .await
        .with_context(|| format!("Failed to bind port {port}"))?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {err}");
            }
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

/// Origin header value for the UI host, accepting `host[:port]` or a full URL.
fn ui_origin(redirect_host: &str) -> Result<HeaderValue> {
    let candidate = if redirect_host.contains("://") {
        redirect_host.to_string()
    } else {
        format!("http://{redirect_host}")
    };
    let parsed =
        Url::parse(&candidate).with_context(|| format!("Invalid redirect host: {redirect_host}"))?;
    let origin = parsed.origin().ascii_serialization();
    HeaderValue::from_str(&origin).context("Failed to build UI origin header")
}
