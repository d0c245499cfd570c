use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::api::error::ApiError;

/// Set by the session layer in front of the service.
pub const USER_ID_HEADER: &str = "x-user-id";

fn user_id_from(parts: &Parts) -> Option<i64> {
    parts
        .headers
        .get(USER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<i64>().ok())
}

/// Authenticated user id; requests without one are refused with 401.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser(pub i64);

impl<S: Send + Sync> FromRequestParts<S> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        user_id_from(parts)
            .map(AuthUser)
            .ok_or_else(|| ApiError::Unauthorized("Unauthorized".to_string()))
    }
}

/// User id when the request carries a valid one.
#[derive(Debug, Clone, Copy)]
pub struct OptionalUser(pub Option<i64>);

impl<S: Send + Sync> FromRequestParts<S> for OptionalUser {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(OptionalUser(user_id_from(parts)))
    }
}
