//! External platform integrations
//!
//! This module provides:
//! - The [`PlatformClient`] trait every platform implements
//! - Wire-agnostic types the sync engine consumes
//! - A registry mapping [`Platform`] to a client instance
//!
//! The connection manager and sync engine depend only on the trait, so
//! adding a platform means adding one implementation here.

mod demo;
mod facebook;

pub use demo::DemoPlatform;
pub use facebook::FacebookClient;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use ring::hmac;

use crate::error::SocialError;
use crate::models::{Direction, Participant, Platform};

/// An access token issued by a platform
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub access_token: String,
    /// None for non-expiring tokens
    pub expires_at: Option<DateTime<Utc>>,
}

/// The external account an access token belongs to
#[derive(Debug, Clone)]
pub struct AccountIdentity {
    pub external_account_id: String,
    pub display_name: String,
    /// Some platforms issue a narrower per-account token during identity
    /// lookup (e.g. a Facebook page token); when present it supersedes the
    /// user-level token for sync purposes.
    pub access_token: Option<String>,
}

/// One message observed on the platform, already mapped to unified fields
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub external_thread_id: String,
    pub external_message_id: String,
    pub sender_id: String,
    pub sender_name: Option<String>,
    pub body: String,
    pub sent_at: DateTime<Utc>,
    pub direction: Direction,
    /// Account/page the event belongs to, when the payload says. Webhook
    /// endpoints are shared per platform, so the sync engine uses this to
    /// keep events out of other accounts' connections.
    pub external_account_id: Option<String>,
}

/// One remote thread with its messages, as returned by a poll page
#[derive(Debug, Clone)]
pub struct RemoteConversation {
    pub external_thread_id: String,
    pub participants: Vec<Participant>,
    pub messages: Vec<InboundMessage>,
}

/// One page of a paginated conversation listing
#[derive(Debug, Clone)]
pub struct ConversationPage {
    pub conversations: Vec<RemoteConversation>,
    /// Cursor for the next page; None when the listing is exhausted
    pub next_cursor: Option<String>,
}

/// Webhook signature validation result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureValidation {
    /// Signature is valid
    Valid,
    /// Signature is invalid
    Invalid,
    /// Signature header is missing
    Missing,
    /// No signing secret configured — validation cannot be performed
    NotConfigured,
}

/// Interface to one external messaging platform
pub trait PlatformClient: Send + Sync {
    fn platform(&self) -> Platform;

    /// Build the URL the user's browser is sent to for authorization
    fn authorize_url(&self, state: &str, redirect_uri: &str) -> String;

    /// Exchange an authorization code for an access token
    fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<TokenGrant, SocialError>;

    /// Obtain a fresh token from the current one
    fn refresh_token(&self, access_token: &str) -> Result<TokenGrant, SocialError>;

    /// Ask the platform to invalidate a token
    fn revoke_token(&self, access_token: &str) -> Result<(), SocialError>;

    /// Resolve the account/page identity behind a token
    fn fetch_identity(&self, access_token: &str) -> Result<AccountIdentity, SocialError>;

    /// Fetch one page of conversations updated since `since`
    fn fetch_conversations(
        &self,
        access_token: &str,
        external_account_id: &str,
        page_cursor: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> Result<ConversationPage, SocialError>;

    /// Send a message into a thread; returns the platform-assigned
    /// message identifier
    fn send_message(
        &self,
        access_token: &str,
        external_account_id: &str,
        external_thread_id: &str,
        body: &str,
    ) -> Result<String, SocialError>;

    /// Parse a webhook payload into unified inbound messages
    fn parse_webhook(&self, raw: &[u8]) -> Result<Vec<InboundMessage>, SocialError>;

    /// Verify a webhook payload's authenticity
    fn verify_signature(&self, signature: Option<&str>, body: &[u8]) -> SignatureValidation;

    /// Check the token presented during a webhook subscription handshake
    fn verify_subscription(&self, _verify_token: &str) -> bool {
        false
    }
}

/// Compute-and-compare an HMAC-SHA256 hex signature in constant time
pub(crate) fn verify_hmac_sha256(secret: &str, signature_hex: &str, body: &[u8]) -> bool {
    let key = hmac::Key::new(hmac::HMAC_SHA256, secret.as_bytes());
    let tag = hmac::sign(&key, body);
    let expected = hex::encode(tag.as_ref());
    subtle::ConstantTimeEq::ct_eq(signature_hex.as_bytes(), expected.as_bytes()).into()
}

/// Sign a payload the way platforms do (test and demo use)
pub fn sign_hmac_sha256(secret: &str, body: &[u8]) -> String {
    let key = hmac::Key::new(hmac::HMAC_SHA256, secret.as_bytes());
    let tag = hmac::sign(&key, body);
    format!("sha256={}", hex::encode(tag.as_ref()))
}

/// Registry of configured platform clients
#[derive(Default)]
pub struct PlatformRegistry {
    clients: HashMap<Platform, Arc<dyn PlatformClient>>,
}

impl PlatformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client under its own platform
    pub fn register(&mut self, client: Arc<dyn PlatformClient>) {
        self.clients.insert(client.platform(), client);
    }

    /// Look up the client for a platform
    pub fn get(&self, platform: Platform) -> Result<Arc<dyn PlatformClient>, SocialError> {
        self.clients
            .get(&platform)
            .cloned()
            .ok_or_else(|| SocialError::UnsupportedPlatform(platform.to_string()))
    }

    pub fn contains(&self, platform: Platform) -> bool {
        self.clients.contains_key(&platform)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_unknown_platform() {
        let registry = PlatformRegistry::new();
        let err = registry.get(Platform::Facebook).err().unwrap();
        assert!(matches!(err, SocialError::UnsupportedPlatform(_)));
    }

    #[test]
    fn test_hmac_sign_verify_roundtrip() {
        let body = br#"{"events":[]}"#;
        let signature = sign_hmac_sha256("topsecret", body);
        let hex_part = signature.strip_prefix("sha256=").unwrap();
        assert!(verify_hmac_sha256("topsecret", hex_part, body));
        assert!(!verify_hmac_sha256("topsecret", hex_part, b"tampered"));
        assert!(!verify_hmac_sha256("wrong", hex_part, body));
    }
}
