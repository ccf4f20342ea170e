//! Login page: one CSRF-protected form per registered provider.

use axum::{
    Json,
    extract::{Extension, Query},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use maud::{DOCTYPE, Markup, html};
use std::sync::Arc;
use tracing::error;
use url::form_urlencoded;

use super::types::{LoginOptions, NextQuery};
use super::{commit_session, load_session, wants_json};
use crate::api::AppState;
use crate::csrf::{self, CSRF_FIELD};
use crate::oauth::safe_next;
use crate::session::Flash;

#[utoipa::path(
    get,
    path = "/login",
    params(("next" = Option<String>, Query, description = "Local path to return to after login")),
    responses(
        (status = 200, description = "HTML login page, or login options for JSON callers", body = LoginOptions),
        (status = 404, description = "Federated login is disabled")
    ),
    tag = "auth"
)]
pub async fn login_page(
    headers: HeaderMap,
    Query(query): Query<NextQuery>,
    state: Extension<Arc<AppState>>,
) -> Response {
    let coordinator = state.coordinator();
    if !coordinator.config().enabled() {
        return StatusCode::NOT_FOUND.into_response();
    }

    let mut session = load_session(&state, &headers).await;
    let token = match csrf::issue_token(&mut session) {
        Ok(token) => token,
        Err(err) => {
            error!("Failed to issue csrf token: {err:#}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    let providers = coordinator.providers().names();

    let response = if wants_json(&headers) {
        Json(LoginOptions {
            csrf_token: token,
            providers,
        })
        .into_response()
    } else {
        let flashes = session.take_flashes();
        let next = safe_next(query.next.as_deref());
        let forms: Vec<(String, String)> = providers
            .into_iter()
            .map(|name| {
                let action = start_action(&coordinator.config().start_url(&name), next.as_deref());
                (name, action)
            })
            .collect();
        render(&flashes, &forms, &token).into_response()
    };

    commit_session(&state, &session, response).await
}

fn start_action(start_url: &str, next: Option<&str>) -> String {
    match next {
        Some(next) => {
            let query = form_urlencoded::Serializer::new(String::new())
                .append_pair("next", next)
                .finish();
            format!("{start_url}?{query}")
        }
        None => start_url.to_string(),
    }
}

fn render(flashes: &[Flash], forms: &[(String, String)], csrf_token: &str) -> Markup {
    html! {
        (DOCTYPE)
        html {
            head {
                meta charset="utf-8";
                title { "Login" }
            }
            body {
                h1 { "Login" }
                @for flash in flashes {
                    div class={ "flash flash-" (flash.category) } { (flash.message) }
                }
                @for (name, action) in forms {
                    form id={ (name) "_form" } method="post" action=(action) {
                        input type="hidden" id={ (name) "_csrf_token" } name=(CSRF_FIELD) value=(csrf_token);
                        button type="submit" { "Sign in with " (name) }
                    }
                }
            }
        }
    }
}
