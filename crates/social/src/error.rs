//! Error taxonomy for the connection and sync layer

use thiserror::Error;

/// Errors surfaced by the connection manager, sync engine and state API.
///
/// Retry policy by variant:
/// - `MalformedEvent` is logged and dropped; the payload will never parse.
/// - `RateLimited` is retryable after backoff; no state was advanced.
/// - `CredentialExpired` is terminal until the user re-authorizes.
/// - `SendFailed` is scoped to one message; the conversation continues.
#[derive(Debug, Error)]
pub enum SocialError {
    #[error("Platform not supported: {0}")]
    UnsupportedPlatform(String),

    #[error("Invalid or expired authorization state")]
    InvalidState,

    #[error("Token exchange failed: {0}")]
    TokenExchangeFailed(String),

    #[error("Credentials expired; re-authorization required")]
    CredentialExpired,

    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    #[error("Rate limited by platform")]
    RateLimited {
        /// Seconds to wait before retrying, when the platform says
        retry_after: Option<u64>,
    },

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Transport-level or unclassified platform API failure
    #[error("Platform request failed: {0}")]
    Platform(String),

    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl SocialError {
    /// Whether the caller may retry the operation later without user action
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SocialError::RateLimited { .. } | SocialError::Platform(_) | SocialError::Storage(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryability() {
        assert!(SocialError::RateLimited { retry_after: None }.is_retryable());
        assert!(!SocialError::CredentialExpired.is_retryable());
        assert!(!SocialError::MalformedEvent("bad json".into()).is_retryable());
        assert!(!SocialError::InvalidState.is_retryable());
    }
}
