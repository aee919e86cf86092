//! Caller identity extraction.
//!
//! Authentication happens upstream; the gateway trusts the user id it is
//! handed in the `X-User-Id` header, or in the `user_id` query parameter for
//! browser WebSocket clients that cannot set headers.

use axum::extract::{FromRequestParts, Query};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use crate::entity::{Membership, ValidationError};

/// Header carrying the authenticated user id.
pub const USER_ID_HEADER: &str = "x-user-id";
/// Optional display name forwarded by the auth layer.
pub const USER_NAME_HEADER: &str = "x-user-name";

/// The user a request acts on behalf of.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
    pub name: Option<String>,
}

impl AuthUser {
    /// This user's profile in `workspace_id`. The display name falls back to
    /// the user id.
    pub fn membership(&self, workspace_id: &str) -> Result<Membership, ValidationError> {
        let name = self.name.clone().unwrap_or_else(|| self.user_id.clone());
        Membership::new(self.user_id.clone(), workspace_id, name, "", false)
    }
}

/// Query parameters honoured on the gateway upgrade request.
#[derive(Debug, Deserialize)]
struct IdentityParams {
    user_id: Option<String>,
}

/// Rejection returned when no user id accompanies the request.
#[derive(Debug)]
pub struct AuthError {
    message: &'static str,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": {
                "code": "UNAUTHORIZED",
                "message": self.message
            }
        });
        (StatusCode::UNAUTHORIZED, Json(body)).into_response()
    }
}

impl<S: Send + Sync> FromRequestParts<S> for AuthUser {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        let from_header = header(USER_ID_HEADER);
        let name = header(USER_NAME_HEADER);

        let user_id = match from_header {
            Some(user_id) => user_id,
            None => query_user_id(parts).ok_or(AuthError {
                message: "Missing user identity",
            })?,
        };

        Ok(AuthUser { user_id, name })
    }
}

fn query_user_id(parts: &Parts) -> Option<String> {
    let Query(params) = Query::<IdentityParams>::try_from_uri(&parts.uri).ok()?;
    params
        .user_id
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
