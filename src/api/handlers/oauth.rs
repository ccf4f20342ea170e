//! Start and callback endpoints of the OAuth handshake.

use axum::{
    Json,
    body::Bytes,
    extract::{Extension, Path, Query},
    http::{HeaderMap, StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
};
use std::{collections::HashMap, sync::Arc};
use tracing::error;
use url::form_urlencoded;

use super::types::{ErrorResponse, NextQuery, StartBody, StartFailedResponse, StartResponse};
use super::{client_error, commit_session, found, load_session, wants_json};
use crate::api::AppState;
use crate::csrf::{CSRF_FIELD, CSRF_HEADER, CsrfError};
use crate::oauth::{
    CallbackError, CallbackParams, Message, StartError, StartOutcome, StartRequest,
};

fn is_json_body(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"))
}

fn form_pairs(body: &[u8]) -> HashMap<String, String> {
    form_urlencoded::parse(body).into_owned().collect()
}

/// Read `next` and the CSRF token from a JSON or form body, falling back to
/// the query string and the `X-CSRF-Token` header.
fn start_request(headers: &HeaderMap, query: NextQuery, body: &[u8]) -> Result<StartRequest, String> {
    let parsed = if body.is_empty() {
        StartBody::default()
    } else if is_json_body(headers) {
        serde_json::from_slice::<StartBody>(body).map_err(|e| format!("invalid JSON body: {e}"))?
    } else {
        let mut fields = form_pairs(body);
        StartBody {
            next: fields.remove("next"),
            csrf_token: fields.remove(CSRF_FIELD),
        }
    };

    let header_token = headers
        .get(CSRF_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string);

    Ok(StartRequest {
        next: parsed.next.or(query.next),
        api: wants_json(headers),
        csrf_token: parsed.csrf_token.or(header_token),
    })
}

#[utoipa::path(
    post,
    path = "/login/oauthstart/{provider}",
    params(
        ("provider" = String, Path, description = "Registered provider name"),
        ("next" = Option<String>, Query, description = "Local path to return to after login")
    ),
    request_body(content = StartBody, description = "JSON or form fields", content_type = "application/json"),
    responses(
        (status = 200, description = "Provider authorization URL for JSON callers", body = StartResponse),
        (status = 502, description = "Provider redirect could not be built (JSON callers)", body = StartFailedResponse),
        (status = 302, description = "Redirect to the provider, or to the post-login view when already authenticated"),
        (status = 400, description = "Missing/invalid CSRF token or already authenticated", body = ErrorResponse),
        (status = 404, description = "Unknown provider")
    ),
    tag = "oauth"
)]
pub async fn start(
    Path(provider): Path<String>,
    Query(query): Query<NextQuery>,
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    body: Bytes,
) -> Response {
    let coordinator = state.coordinator();
    if !coordinator.config().enabled() || coordinator.providers().get(&provider).is_none() {
        return StatusCode::NOT_FOUND.into_response();
    }

    let request = match start_request(&headers, query, &body) {
        Ok(request) => request,
        Err(message) => return client_error(StatusCode::BAD_REQUEST, message, true),
    };
    let json = request.api;

    let mut session = load_session(&state, &headers).await;
    let response = match coordinator.start(&provider, &request, &mut session) {
        Ok(StartOutcome::Provider { location }) if json => {
            Json(StartResponse { location }).into_response()
        }
        Ok(StartOutcome::Failed { location, message }) if json => (
            StatusCode::BAD_GATEWAY,
            Json(StartFailedResponse {
                error: message.unwrap_or_else(|| "OAuth handshake failed".to_string()),
                location,
            }),
        )
            .into_response(),
        Ok(
            StartOutcome::Provider { location }
            | StartOutcome::AlreadyAuthenticated { location }
            | StartOutcome::Failed { location, .. },
        ) => found(&location),
        Err(StartError::UnknownProvider(_)) => StatusCode::NOT_FOUND.into_response(),
        Err(StartError::AlreadyAuthenticated) => client_error(
            StatusCode::BAD_REQUEST,
            coordinator
                .messages()
                .render(Message::AlreadyAuthenticated, &[]),
            json,
        ),
        Err(StartError::Csrf(err)) => {
            let message = match err {
                CsrfError::Missing => Message::CsrfMissing,
                CsrfError::Invalid => Message::CsrfInvalid,
            };
            client_error(
                StatusCode::BAD_REQUEST,
                coordinator.messages().render(message, &[]),
                json,
            )
        }
        Err(err @ StartError::Session(_)) => {
            error!("Failed to start handshake: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    };

    commit_session(&state, &session, response).await
}

async fn complete(
    provider: &str,
    params: CallbackParams,
    headers: &HeaderMap,
    state: &AppState,
) -> Response {
    let coordinator = state.coordinator();
    if !coordinator.config().enabled() {
        return StatusCode::NOT_FOUND.into_response();
    }

    let mut session = load_session(state, headers).await;
    let response = match coordinator.callback(provider, &params, &mut session).await {
        Ok(outcome) => found(outcome.location()),
        Err(CallbackError::UnknownProvider(_)) => StatusCode::NOT_FOUND.into_response(),
        Err(err) => {
            error!("OAuth callback failed: {err:#}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    };

    // The handshake was consumed whatever the outcome; persist that.
    commit_session(state, &session, response).await
}

#[utoipa::path(
    get,
    path = "/login/oauthresponse/{provider}",
    params(("provider" = String, Path, description = "Registered provider name")),
    responses(
        (status = 302, description = "Redirect to the next/post-login view, two-factor view or login-error view"),
        (status = 404, description = "Unknown provider")
    ),
    tag = "oauth"
)]
pub async fn callback(
    Path(provider): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
) -> Response {
    complete(&provider, CallbackParams::new(params), &headers, &state).await
}

/// Providers using `response_mode=form_post` deliver the same parameters as a form.
#[utoipa::path(
    post,
    path = "/login/oauthresponse/{provider}",
    params(("provider" = String, Path, description = "Registered provider name")),
    request_body(
        content = String,
        description = "Callback parameters (`code`, `state`, `error`, ...) as form fields",
        content_type = "application/x-www-form-urlencoded"
    ),
    responses(
        (status = 302, description = "Redirect to the next/post-login view, two-factor view or login-error view"),
        (status = 404, description = "Unknown provider")
    ),
    tag = "oauth"
)]
pub async fn callback_form(
    Path(provider): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    body: Bytes,
) -> Response {
    let mut params = query;
    params.extend(form_pairs(&body));
    complete(&provider, CallbackParams::new(params), &headers, &state).await
}
