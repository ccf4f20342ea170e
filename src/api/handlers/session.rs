//! Session endpoints for the cookie set by the OAuth callback.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode, header::SET_COOKIE},
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::error;

use super::load_session;
use super::types::SessionResponse;
use crate::api::AppState;
use crate::session::{clear_session_cookie, extract_session_token};

#[utoipa::path(
    get,
    path = "/v1/auth/session",
    responses(
        (status = 200, description = "Session is active", body = SessionResponse),
        (status = 204, description = "No active session")
    ),
    tag = "auth"
)]
pub async fn session(headers: HeaderMap, state: Extension<Arc<AppState>>) -> impl IntoResponse {
    // A session without a user (mid-handshake, pending second factor) is "no session".
    let Some(user_id) = load_session(&state, &headers).await.user_id() else {
        return StatusCode::NO_CONTENT.into_response();
    };
    match state.coordinator().users().find_by_id(user_id).await {
        Ok(Some(user)) if user.active => {
            let response = SessionResponse {
                user_id: user.id.to_string(),
                email: user.email,
            };
            (StatusCode::OK, Json(response)).into_response()
        }
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            error!("Failed to lookup session user: {err:#}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    responses(
        (status = 204, description = "Session cleared")
    ),
    tag = "auth"
)]
pub async fn logout(headers: HeaderMap, state: Extension<Arc<AppState>>) -> impl IntoResponse {
    if let Some(token) = extract_session_token(&headers) {
        state.sessions().delete(&token).await;
    }

    // Always clear the cookie, even if the session was already gone.
    let mut response_headers = HeaderMap::new();
    if let Ok(cookie) = clear_session_cookie(state.session_config()) {
        response_headers.insert(SET_COOKIE, cookie);
    }
    (StatusCode::NO_CONTENT, response_headers).into_response()
}
