//! Request/response types for the HTTP surface.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Body accepted by the start endpoint, as JSON or form fields.
#[derive(ToSchema, Serialize, Deserialize, Debug, Default)]
pub struct StartBody {
    pub next: Option<String>,
    pub csrf_token: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct StartResponse {
    /// Provider authorization URL the client must navigate to.
    pub location: String,
}

/// Start failure reported to JSON callers instead of a redirect.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct StartFailedResponse {
    pub error: String,
    /// Where a browser would have been sent.
    pub location: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginOptions {
    pub csrf_token: String,
    pub providers: Vec<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SessionResponse {
    pub user_id: String,
    pub email: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Deserialize, Debug, Default)]
pub struct NextQuery {
    pub next: Option<String>,
}
