//! HTTP request handlers, grouped by surface.

pub mod events;
pub mod health;
pub mod oauth;
pub mod state;
pub mod webhooks;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use social::SocialError;

/// Build a standard JSON error response.
pub fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    let body = serde_json::json!({ "error": message.into() });
    (status, axum::Json(body)).into_response()
}

/// Map a [`SocialError`] onto an HTTP response.
pub fn social_error(e: SocialError) -> Response {
    let status = match &e {
        SocialError::NotFound(_) => StatusCode::NOT_FOUND,
        SocialError::UnsupportedPlatform(_) => StatusCode::NOT_FOUND,
        SocialError::InvalidState | SocialError::MalformedEvent(_) => StatusCode::BAD_REQUEST,
        SocialError::CredentialExpired => StatusCode::CONFLICT,
        SocialError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        SocialError::TokenExchangeFailed(_) => StatusCode::BAD_GATEWAY,
        SocialError::SendFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
        SocialError::Platform(_) => StatusCode::BAD_GATEWAY,
        SocialError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    api_error(status, e.to_string())
}
