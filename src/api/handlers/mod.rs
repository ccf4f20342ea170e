//! Route handlers and the helpers they share for session I/O and responses.

pub mod health;
pub mod login;
pub mod oauth;
pub mod session;
pub mod types;


use axum::{
    Json,
    http::{
        HeaderMap, HeaderValue, StatusCode,
        header::{ACCEPT, CONTENT_TYPE, LOCATION, SET_COOKIE},
    },
    response::{IntoResponse, Response},
};
use tracing::error;

use self::types::ErrorResponse;
use super::AppState;
use crate::session::{Session, extract_session_token, session_cookie};

/// Load the caller's session from the cookie (fresh when absent or expired).
pub(crate) async fn load_session(state: &AppState, headers: &HeaderMap) -> Session {
    let token = extract_session_token(headers);
    state.sessions().load(token.as_deref()).await
}

/// Persist a modified session and attach its cookie to `response`.
///
/// A failed save turns the response into a 500 so the caller never proceeds
/// with state that was not stored.
pub(crate) async fn commit_session(state: &AppState, session: &Session, response: Response) -> Response {
    if !session.is_modified() {
        return response;
    }
    let token = match state.sessions().save(session).await {
        Ok(token) => token,
        Err(err) => {
            error!("Failed to save session: {err:#}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    match session_cookie(state.session_config(), &token) {
        Ok(cookie) => {
            let mut response = response;
            response.headers_mut().append(SET_COOKIE, cookie);
            response
        }
        Err(err) => {
            error!("Failed to build session cookie: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Whether the caller speaks JSON rather than HTML forms.
pub(crate) fn wants_json(headers: &HeaderMap) -> bool {
    let mentions_json = |value: Option<&HeaderValue>| {
        value
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("application/json"))
    };
    mentions_json(headers.get(ACCEPT)) || mentions_json(headers.get(CONTENT_TYPE))
}

/// `302 Found` to `location`.
pub(crate) fn found(location: &str) -> Response {
    match HeaderValue::from_str(location) {
        Ok(value) => {
            let mut headers = HeaderMap::new();
            headers.insert(LOCATION, value);
            (StatusCode::FOUND, headers).into_response()
        }
        Err(err) => {
            error!("Invalid redirect location: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// A client error carrying a user-facing message, as JSON or plain text.
pub(crate) fn client_error(status: StatusCode, message: String, json: bool) -> Response {
    if json {
        (status, Json(ErrorResponse { error: message })).into_response()
    } else {
        (status, message).into_response()
    }
}
