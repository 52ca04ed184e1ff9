//! In-process demo platform
//!
//! A scriptable [`PlatformClient`] with no network I/O. It backs the demo
//! run mode and the integration tests: failure injection for refresh and
//! send, rate limiting at a chosen page boundary, and call counters to
//! observe how often the engine actually hit the platform.

use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;

use super::{
    AccountIdentity, ConversationPage, InboundMessage, PlatformClient, RemoteConversation,
    SignatureValidation, TokenGrant, verify_hmac_sha256,
};
use crate::error::SocialError;
use crate::models::{Direction, Participant, Platform};

/// Demo webhook payload shape
#[derive(Debug, Deserialize)]
struct DemoWebhookPayload {
    events: Vec<DemoWebhookEvent>,
}

#[derive(Debug, Deserialize)]
struct DemoWebhookEvent {
    thread: String,
    id: String,
    sender: String,
    sender_name: Option<String>,
    body: String,
    /// Seconds since epoch
    timestamp: i64,
    /// "inbound" (default) or "outbound"
    direction: Option<String>,
    /// Account the event is addressed to; omitted events match any
    /// connection
    account: Option<String>,
}

struct DemoState {
    token_seq: u64,
    send_seq: u64,
    refresh_calls: u64,
    send_calls: u64,
    revoke_calls: u64,
    token_ttl_secs: Option<i64>,
    fail_refresh: bool,
    fail_sends: bool,
    /// Return `RateLimited` when asked for page index >= this
    rate_limit_after_pages: Option<usize>,
    page_size: usize,
    refresh_delay: Option<Duration>,
    fetch_delay: Option<Duration>,
    remote: Vec<RemoteConversation>,
}

/// Scriptable platform for demos and tests
pub struct DemoPlatform {
    state: Mutex<DemoState>,
    webhook_secret: Option<String>,
}

impl Default for DemoPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl DemoPlatform {
    pub const ACCOUNT_ID: &'static str = "acct-1";
    pub const ACCOUNT_NAME: &'static str = "Demo Account";

    pub fn new() -> Self {
        Self {
            state: Mutex::new(DemoState {
                token_seq: 0,
                send_seq: 0,
                refresh_calls: 0,
                send_calls: 0,
                revoke_calls: 0,
                token_ttl_secs: None,
                fail_refresh: false,
                fail_sends: false,
                rate_limit_after_pages: None,
                page_size: 2,
                refresh_delay: None,
                fetch_delay: None,
                remote: Vec::new(),
            }),
            webhook_secret: None,
        }
    }

    pub fn with_webhook_secret(mut self, secret: impl Into<String>) -> Self {
        self.webhook_secret = Some(secret.into());
        self
    }

    /// Issue tokens that expire `secs` after grant
    pub fn set_token_ttl_secs(&self, secs: i64) {
        self.state.lock().unwrap().token_ttl_secs = Some(secs);
    }

    pub fn set_fail_refresh(&self, fail: bool) {
        self.state.lock().unwrap().fail_refresh = fail;
    }

    pub fn set_fail_sends(&self, fail: bool) {
        self.state.lock().unwrap().fail_sends = fail;
    }

    /// Rate-limit any listing request for page index >= `pages`
    pub fn set_rate_limit_after_pages(&self, pages: Option<usize>) {
        self.state.lock().unwrap().rate_limit_after_pages = pages;
    }

    pub fn set_page_size(&self, size: usize) {
        self.state.lock().unwrap().page_size = size.max(1);
    }

    /// Hold each refresh for `delay` (for exercising concurrent callers)
    pub fn set_refresh_delay(&self, delay: Option<Duration>) {
        self.state.lock().unwrap().refresh_delay = delay;
    }

    /// Hold each listing fetch for `delay` (for exercising overlapping polls)
    pub fn set_fetch_delay(&self, delay: Option<Duration>) {
        self.state.lock().unwrap().fetch_delay = delay;
    }

    pub fn refresh_calls(&self) -> u64 {
        self.state.lock().unwrap().refresh_calls
    }

    pub fn send_calls(&self) -> u64 {
        self.state.lock().unwrap().send_calls
    }

    pub fn revoke_calls(&self) -> u64 {
        self.state.lock().unwrap().revoke_calls
    }

    /// Append a message to a remote thread, creating the thread as needed
    pub fn seed_message(
        &self,
        thread: &str,
        external_message_id: &str,
        sender: &str,
        body: &str,
        sent_at: DateTime<Utc>,
    ) {
        let mut state = self.state.lock().unwrap();
        let message = InboundMessage {
            external_thread_id: thread.to_string(),
            external_message_id: external_message_id.to_string(),
            sender_id: sender.to_string(),
            sender_name: None,
            body: body.to_string(),
            sent_at,
            direction: if sender == Self::ACCOUNT_ID {
                Direction::Outbound
            } else {
                Direction::Inbound
            },
            external_account_id: None,
        };
        if let Some(conversation) = state
            .remote
            .iter_mut()
            .find(|c| c.external_thread_id == thread)
        {
            conversation.messages.push(message);
        } else {
            state.remote.push(RemoteConversation {
                external_thread_id: thread.to_string(),
                participants: vec![
                    Participant {
                        id: Self::ACCOUNT_ID.to_string(),
                        name: Some(Self::ACCOUNT_NAME.to_string()),
                    },
                    Participant {
                        id: sender.to_string(),
                        name: None,
                    },
                ],
                messages: vec![message],
            });
        }
    }

    fn grant(state: &mut DemoState) -> TokenGrant {
        state.token_seq += 1;
        TokenGrant {
            access_token: format!("demo-token-{}", state.token_seq),
            expires_at: state
                .token_ttl_secs
                .map(|ttl| Utc::now() + chrono::Duration::seconds(ttl)),
        }
    }
}

impl PlatformClient for DemoPlatform {
    fn platform(&self) -> Platform {
        Platform::Demo
    }

    fn authorize_url(&self, state: &str, redirect_uri: &str) -> String {
        format!(
            "demo://authorize?state={}&redirect_uri={}",
            urlencoding::encode(state),
            urlencoding::encode(redirect_uri),
        )
    }

    fn exchange_code(&self, _code: &str, _redirect_uri: &str) -> Result<TokenGrant, SocialError> {
        let mut state = self.state.lock().unwrap();
        Ok(Self::grant(&mut state))
    }

    fn refresh_token(&self, _access_token: &str) -> Result<TokenGrant, SocialError> {
        let delay = self.state.lock().unwrap().refresh_delay;
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        let mut state = self.state.lock().unwrap();
        state.refresh_calls += 1;
        if state.fail_refresh {
            return Err(SocialError::CredentialExpired);
        }
        Ok(Self::grant(&mut state))
    }

    fn revoke_token(&self, _access_token: &str) -> Result<(), SocialError> {
        self.state.lock().unwrap().revoke_calls += 1;
        Ok(())
    }

    fn fetch_identity(&self, _access_token: &str) -> Result<AccountIdentity, SocialError> {
        Ok(AccountIdentity {
            external_account_id: Self::ACCOUNT_ID.to_string(),
            display_name: Self::ACCOUNT_NAME.to_string(),
            access_token: None,
        })
    }

    fn fetch_conversations(
        &self,
        _access_token: &str,
        _external_account_id: &str,
        page_cursor: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> Result<ConversationPage, SocialError> {
        let delay = self.state.lock().unwrap().fetch_delay;
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        let state = self.state.lock().unwrap();

        // Cursors are plain page indexes
        let page: usize = match page_cursor {
            Some(cursor) => cursor
                .parse()
                .map_err(|_| SocialError::Platform(format!("bad cursor: {cursor}")))?,
            None => 0,
        };
        if let Some(limit) = state.rate_limit_after_pages
            && page >= limit
        {
            return Err(SocialError::RateLimited {
                retry_after: Some(1),
            });
        }

        let start = page * state.page_size;
        let conversations: Vec<RemoteConversation> = state
            .remote
            .iter()
            .skip(start)
            .take(state.page_size)
            .map(|c| {
                let mut c = c.clone();
                if let Some(since) = since {
                    c.messages.retain(|m| m.sent_at > since);
                }
                c
            })
            .collect();

        let next_cursor = if start + state.page_size < state.remote.len() {
            Some((page + 1).to_string())
        } else {
            None
        };

        Ok(ConversationPage {
            conversations,
            next_cursor,
        })
    }

    fn send_message(
        &self,
        _access_token: &str,
        _external_account_id: &str,
        external_thread_id: &str,
        body: &str,
    ) -> Result<String, SocialError> {
        let send_seq = {
            let mut state = self.state.lock().unwrap();
            state.send_calls += 1;
            if state.fail_sends {
                return Err(SocialError::SendFailed("demo send failure".to_string()));
            }
            state.send_seq += 1;
            state.send_seq
        };
        let external_message_id = format!("demo-msg-{send_seq}");
        // Record the send remotely so later polls echo it back
        self.seed_message(
            external_thread_id,
            &external_message_id,
            Self::ACCOUNT_ID,
            body,
            Utc::now(),
        );
        Ok(external_message_id)
    }

    fn parse_webhook(&self, raw: &[u8]) -> Result<Vec<InboundMessage>, SocialError> {
        let payload: DemoWebhookPayload = serde_json::from_slice(raw)
            .map_err(|e| SocialError::MalformedEvent(format!("invalid webhook JSON: {e}")))?;
        payload
            .events
            .into_iter()
            .map(|event| {
                let sent_at = Utc
                    .timestamp_opt(event.timestamp, 0)
                    .single()
                    .ok_or_else(|| {
                        SocialError::MalformedEvent(format!(
                            "bad timestamp: {}",
                            event.timestamp
                        ))
                    })?;
                let direction = match event.direction.as_deref() {
                    None | Some("inbound") => Direction::Inbound,
                    Some("outbound") => Direction::Outbound,
                    Some(other) => {
                        return Err(SocialError::MalformedEvent(format!(
                            "bad direction: {other}"
                        )));
                    }
                };
                Ok(InboundMessage {
                    external_thread_id: event.thread,
                    external_message_id: event.id,
                    sender_id: event.sender,
                    sender_name: event.sender_name,
                    body: event.body,
                    sent_at,
                    direction,
                    external_account_id: event.account,
                })
            })
            .collect()
    }

    fn verify_signature(&self, signature: Option<&str>, body: &[u8]) -> SignatureValidation {
        let Some(secret) = self.webhook_secret.as_deref() else {
            return SignatureValidation::NotConfigured;
        };
        let Some(signature) = signature else {
            return SignatureValidation::Missing;
        };
        let hex_part = signature.strip_prefix("sha256=").unwrap_or(signature);
        if verify_hmac_sha256(secret, hex_part, body) {
            SignatureValidation::Valid
        } else {
            SignatureValidation::Invalid
        }
    }

    fn verify_subscription(&self, verify_token: &str) -> bool {
        verify_token == "demo"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paging_with_cursors() {
        let demo = DemoPlatform::new();
        demo.set_page_size(2);
        let now = Utc::now();
        for i in 0..5 {
            demo.seed_message(&format!("thread-{i}"), &format!("m-{i}"), "peer", "hi", now);
        }

        let first = demo
            .fetch_conversations("t", DemoPlatform::ACCOUNT_ID, None, None)
            .unwrap();
        assert_eq!(first.conversations.len(), 2);
        assert_eq!(first.next_cursor.as_deref(), Some("1"));

        let second = demo
            .fetch_conversations("t", DemoPlatform::ACCOUNT_ID, Some("1"), None)
            .unwrap();
        assert_eq!(second.conversations.len(), 2);
        assert_eq!(second.next_cursor.as_deref(), Some("2"));

        let last = demo
            .fetch_conversations("t", DemoPlatform::ACCOUNT_ID, Some("2"), None)
            .unwrap();
        assert_eq!(last.conversations.len(), 1);
        assert!(last.next_cursor.is_none());
    }

    #[test]
    fn test_rate_limit_at_page_boundary() {
        let demo = DemoPlatform::new();
        demo.set_page_size(1);
        demo.set_rate_limit_after_pages(Some(1));
        let now = Utc::now();
        demo.seed_message("t-1", "m-1", "peer", "a", now);
        demo.seed_message("t-2", "m-2", "peer", "b", now);

        assert!(
            demo.fetch_conversations("t", DemoPlatform::ACCOUNT_ID, None, None)
                .is_ok()
        );
        let err = demo
            .fetch_conversations("t", DemoPlatform::ACCOUNT_ID, Some("1"), None)
            .unwrap_err();
        assert!(matches!(err, SocialError::RateLimited { .. }));

        demo.set_rate_limit_after_pages(None);
        assert!(
            demo.fetch_conversations("t", DemoPlatform::ACCOUNT_ID, Some("1"), None)
                .is_ok()
        );
    }

    #[test]
    fn test_since_filters_messages() {
        let demo = DemoPlatform::new();
        let old = Utc::now() - chrono::Duration::hours(2);
        let fresh = Utc::now();
        demo.seed_message("t-1", "m-old", "peer", "old", old);
        demo.seed_message("t-1", "m-new", "peer", "new", fresh);

        let page = demo
            .fetch_conversations(
                "t",
                DemoPlatform::ACCOUNT_ID,
                None,
                Some(Utc::now() - chrono::Duration::hours(1)),
            )
            .unwrap();
        assert_eq!(page.conversations[0].messages.len(), 1);
        assert_eq!(page.conversations[0].messages[0].external_message_id, "m-new");
    }

    #[test]
    fn test_send_echoes_into_remote_state() {
        let demo = DemoPlatform::new();
        let id = demo
            .send_message("t", DemoPlatform::ACCOUNT_ID, "peer-1", "hello")
            .unwrap();
        assert_eq!(id, "demo-msg-1");
        assert_eq!(demo.send_calls(), 1);

        let page = demo
            .fetch_conversations("t", DemoPlatform::ACCOUNT_ID, None, None)
            .unwrap();
        assert_eq!(page.conversations.len(), 1);
        assert_eq!(page.conversations[0].messages[0].direction, Direction::Outbound);
    }

    #[test]
    fn test_failed_send_counts_attempt() {
        let demo = DemoPlatform::new();
        demo.set_fail_sends(true);
        let err = demo
            .send_message("t", DemoPlatform::ACCOUNT_ID, "peer-1", "hello")
            .unwrap_err();
        assert!(matches!(err, SocialError::SendFailed(_)));
        assert_eq!(demo.send_calls(), 1);
    }

    #[test]
    fn test_parse_webhook() {
        let demo = DemoPlatform::new();
        let raw = br#"{"events":[
            {"thread":"t-1","id":"m-1","sender":"peer","body":"hi","timestamp":1700000000},
            {"thread":"t-1","id":"m-2","sender":"acct-1","body":"yo","timestamp":1700000001,"direction":"outbound"}
        ]}"#;
        let events = demo.parse_webhook(raw).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].direction, Direction::Inbound);
        assert_eq!(events[1].direction, Direction::Outbound);

        assert!(matches!(
            demo.parse_webhook(b"[]"),
            Err(SocialError::MalformedEvent(_))
        ));
    }
}
