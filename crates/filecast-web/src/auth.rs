//! Caller identity.
//!
//! Sessions are validated upstream; by the time a request reaches these
//! routes the session layer has put the authenticated user's id in the
//! `x-user-id` header.

use axum::{extract::FromRequestParts, http::request::Parts, http::StatusCode};

pub const USER_ID_HEADER: &str = "x-user-id";

/// Authenticated user id extracted from the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser(pub String);

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(|id| AuthUser(id.to_string()))
            .ok_or((StatusCode::UNAUTHORIZED, "not authenticated"))
    }
}
