//! Facebook page-level Messenger integration
//!
//! Talks to the Graph API over synchronous HTTP (ureq) to stay
//! executor-agnostic. The page inbox is the unit of connection: the OAuth
//! flow yields a user token, identity lookup resolves the managed page and
//! its page token, and all sync traffic runs with the page token.
//!
//! Threads are keyed by the non-page participant id on both delivery
//! paths (webhook and poll), so the two paths converge on one
//! conversation per peer.

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;

use super::{
    AccountIdentity, ConversationPage, InboundMessage, PlatformClient, RemoteConversation,
    SignatureValidation, TokenGrant, verify_hmac_sha256,
};
use crate::config::PlatformCredentials;
use crate::error::SocialError;
use crate::models::{Direction, Participant, Platform};

/// Graph API response types
pub mod api {
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    pub struct TokenResponse {
        pub access_token: String,
        pub expires_in: Option<u64>,
    }

    #[derive(Debug, Deserialize)]
    pub struct AccountsResponse {
        pub data: Vec<PageAccount>,
    }

    /// A page the authorizing user manages
    #[derive(Debug, Deserialize)]
    pub struct PageAccount {
        pub id: String,
        pub name: String,
        pub access_token: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    pub struct ConversationsResponse {
        pub data: Vec<GraphConversation>,
        pub paging: Option<Paging>,
    }

    #[derive(Debug, Deserialize)]
    pub struct GraphConversation {
        pub id: String,
        pub participants: Option<ParticipantList>,
        pub messages: Option<MessageList>,
    }

    #[derive(Debug, Deserialize)]
    pub struct ParticipantList {
        pub data: Vec<GraphParticipant>,
    }

    #[derive(Debug, Deserialize)]
    pub struct GraphParticipant {
        pub id: String,
        pub name: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    pub struct MessageList {
        pub data: Vec<GraphMessage>,
    }

    #[derive(Debug, Deserialize)]
    pub struct GraphMessage {
        pub id: String,
        pub message: Option<String>,
        pub from: Option<GraphParticipant>,
        pub created_time: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Paging {
        pub cursors: Option<Cursors>,
        pub next: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Cursors {
        pub after: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    pub struct SendResponse {
        pub message_id: String,
    }

    /// Webhook payload: https://developers.facebook.com/docs/messenger-platform/webhooks
    #[derive(Debug, Deserialize)]
    pub struct WebhookPayload {
        pub object: String,
        pub entry: Vec<WebhookEntry>,
    }

    #[derive(Debug, Deserialize)]
    pub struct WebhookEntry {
        /// Page the entry belongs to
        pub id: String,
        pub messaging: Option<Vec<MessagingEvent>>,
    }

    #[derive(Debug, Deserialize)]
    pub struct MessagingEvent {
        pub sender: Psid,
        pub recipient: Psid,
        /// Milliseconds since epoch
        pub timestamp: Option<i64>,
        pub message: Option<MessagingMessage>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Psid {
        pub id: String,
    }

    #[derive(Debug, Deserialize)]
    pub struct MessagingMessage {
        pub mid: String,
        pub text: Option<String>,
        #[serde(default)]
        pub is_echo: bool,
    }
}

/// Facebook Graph API client
pub struct FacebookClient {
    credentials: PlatformCredentials,
    graph_url: String,
    dialog_url: String,
}

impl FacebookClient {
    const GRAPH_URL: &'static str = "https://graph.facebook.com/v19.0";
    const DIALOG_URL: &'static str = "https://www.facebook.com/v19.0";

    /// Permissions needed to list pages and read/send page messages
    const SCOPES: &'static str = "pages_show_list,pages_messaging,pages_read_engagement";

    /// Conversations fetched per page
    const PAGE_LIMIT: usize = 20;

    pub fn new(credentials: PlatformCredentials) -> Self {
        Self {
            credentials,
            graph_url: Self::GRAPH_URL.to_string(),
            dialog_url: Self::DIALOG_URL.to_string(),
        }
    }

    fn token_request(&self, url: &str, what: &str) -> Result<TokenGrant, SocialError> {
        let mut response = ureq::get(url)
            .call()
            .map_err(|e| SocialError::TokenExchangeFailed(format!("{what}: {e}")))?;
        let token: api::TokenResponse = response
            .body_mut()
            .read_json()
            .map_err(|e| SocialError::TokenExchangeFailed(format!("{what}: invalid response: {e}")))?;
        Ok(TokenGrant {
            access_token: token.access_token,
            expires_at: token
                .expires_in
                .map(|secs| Utc::now() + chrono::Duration::seconds(secs as i64)),
        })
    }
}

/// Map a Graph API call error to the unified taxonomy
fn map_graph_error(e: ureq::Error) -> SocialError {
    match e {
        ureq::Error::StatusCode(429) => SocialError::RateLimited { retry_after: None },
        ureq::Error::StatusCode(401) | ureq::Error::StatusCode(403) => {
            SocialError::CredentialExpired
        }
        other => SocialError::Platform(other.to_string()),
    }
}

/// Parse a Graph timestamp ("2024-01-15T10:00:00+0000" or RFC 3339)
fn parse_graph_time(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .or_else(|_| DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%z"))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Map one Graph conversation to the unified shape
fn normalize_conversation(
    conversation: api::GraphConversation,
    page_id: &str,
) -> RemoteConversation {
    let participants: Vec<Participant> = conversation
        .participants
        .map(|p| {
            p.data
                .into_iter()
                .map(|gp| Participant {
                    id: gp.id,
                    name: gp.name,
                })
                .collect()
        })
        .unwrap_or_default();

    // Key the thread by the peer, not the Graph conversation id, so webhook
    // events (which only carry PSIDs) land in the same conversation.
    let external_thread_id = participants
        .iter()
        .find(|p| p.id != page_id)
        .map(|p| p.id.clone())
        .unwrap_or(conversation.id);

    let messages = conversation
        .messages
        .map(|list| {
            list.data
                .into_iter()
                .filter_map(|m| {
                    let from = m.from?;
                    let direction = if from.id == page_id {
                        Direction::Outbound
                    } else {
                        Direction::Inbound
                    };
                    Some(InboundMessage {
                        external_thread_id: external_thread_id.clone(),
                        external_message_id: m.id,
                        sender_id: from.id,
                        sender_name: from.name,
                        body: m.message.unwrap_or_default(),
                        sent_at: m
                            .created_time
                            .as_deref()
                            .and_then(parse_graph_time)
                            .unwrap_or_else(Utc::now),
                        direction,
                        external_account_id: Some(page_id.to_string()),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    RemoteConversation {
        external_thread_id,
        participants,
        messages,
    }
}

impl PlatformClient for FacebookClient {
    fn platform(&self) -> Platform {
        Platform::Facebook
    }

    fn authorize_url(&self, state: &str, redirect_uri: &str) -> String {
        format!(
            "{}/dialog/oauth?client_id={}&redirect_uri={}&state={}&scope={}",
            self.dialog_url,
            urlencoding::encode(&self.credentials.client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(state),
            urlencoding::encode(Self::SCOPES),
        )
    }

    fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<TokenGrant, SocialError> {
        let url = format!(
            "{}/oauth/access_token?client_id={}&redirect_uri={}&client_secret={}&code={}",
            self.graph_url,
            urlencoding::encode(&self.credentials.client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(&self.credentials.client_secret),
            urlencoding::encode(code),
        );
        self.token_request(&url, "code exchange")
    }

    fn refresh_token(&self, access_token: &str) -> Result<TokenGrant, SocialError> {
        // Facebook has no refresh grant; a long-lived token is obtained by
        // re-exchanging the current one.
        let url = format!(
            "{}/oauth/access_token?grant_type=fb_exchange_token&client_id={}&client_secret={}&fb_exchange_token={}",
            self.graph_url,
            urlencoding::encode(&self.credentials.client_id),
            urlencoding::encode(&self.credentials.client_secret),
            urlencoding::encode(access_token),
        );
        self.token_request(&url, "token refresh")
    }

    fn revoke_token(&self, access_token: &str) -> Result<(), SocialError> {
        let url = format!(
            "{}/me/permissions?access_token={}",
            self.graph_url,
            urlencoding::encode(access_token),
        );
        ureq::delete(&url).call().map_err(map_graph_error)?;
        Ok(())
    }

    fn fetch_identity(&self, access_token: &str) -> Result<AccountIdentity, SocialError> {
        let url = format!(
            "{}/me/accounts?access_token={}",
            self.graph_url,
            urlencoding::encode(access_token),
        );
        let mut response = ureq::get(&url).call().map_err(map_graph_error)?;
        let accounts: api::AccountsResponse = response
            .body_mut()
            .read_json()
            .map_err(|e| SocialError::Platform(format!("invalid accounts response: {e}")))?;

        let page = accounts
            .data
            .into_iter()
            .next()
            .ok_or_else(|| SocialError::Platform("account manages no pages".to_string()))?;

        Ok(AccountIdentity {
            external_account_id: page.id,
            display_name: page.name,
            access_token: page.access_token,
        })
    }

    fn fetch_conversations(
        &self,
        access_token: &str,
        external_account_id: &str,
        page_cursor: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> Result<ConversationPage, SocialError> {
        let mut url = format!(
            "{}/{}/conversations?fields=participants,messages.limit(25){{id,message,from,created_time}}&limit={}&access_token={}",
            self.graph_url,
            external_account_id,
            Self::PAGE_LIMIT,
            urlencoding::encode(access_token),
        );
        if let Some(cursor) = page_cursor {
            url.push_str(&format!("&after={}", urlencoding::encode(cursor)));
        }
        if let Some(since) = since {
            url.push_str(&format!("&since={}", since.timestamp()));
        }

        let mut response = ureq::get(&url).call().map_err(map_graph_error)?;
        let listing: api::ConversationsResponse = response
            .body_mut()
            .read_json()
            .map_err(|e| SocialError::Platform(format!("invalid conversations response: {e}")))?;

        let next_cursor = listing.paging.and_then(|p| {
            // A cursor is only meaningful when the platform says there is
            // another page.
            p.next.and(p.cursors.and_then(|c| c.after))
        });

        let conversations = listing
            .data
            .into_iter()
            .map(|c| normalize_conversation(c, external_account_id))
            .collect();

        Ok(ConversationPage {
            conversations,
            next_cursor,
        })
    }

    fn send_message(
        &self,
        access_token: &str,
        external_account_id: &str,
        external_thread_id: &str,
        body: &str,
    ) -> Result<String, SocialError> {
        let url = format!(
            "{}/{}/messages?access_token={}",
            self.graph_url,
            external_account_id,
            urlencoding::encode(access_token),
        );
        let mut response = ureq::post(&url)
            .send_json(serde_json::json!({
                "recipient": { "id": external_thread_id },
                "messaging_type": "RESPONSE",
                "message": { "text": body },
            }))
            .map_err(|e| match e {
                ureq::Error::StatusCode(429) => SocialError::RateLimited { retry_after: None },
                other => SocialError::SendFailed(other.to_string()),
            })?;
        let sent: api::SendResponse = response
            .body_mut()
            .read_json()
            .map_err(|e| SocialError::SendFailed(format!("invalid send response: {e}")))?;
        Ok(sent.message_id)
    }

    fn parse_webhook(&self, raw: &[u8]) -> Result<Vec<InboundMessage>, SocialError> {
        let payload: api::WebhookPayload = serde_json::from_slice(raw)
            .map_err(|e| SocialError::MalformedEvent(format!("invalid webhook JSON: {e}")))?;
        if payload.object != "page" {
            return Err(SocialError::MalformedEvent(format!(
                "unexpected webhook object: {}",
                payload.object
            )));
        }

        let mut events = Vec::new();
        for entry in payload.entry {
            for event in entry.messaging.unwrap_or_default() {
                // Delivery receipts and read events carry no message
                let Some(message) = event.message else {
                    continue;
                };
                let sent_at = event
                    .timestamp
                    .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
                    .unwrap_or_else(Utc::now);
                let (direction, external_thread_id) = if message.is_echo {
                    // Echo of a page-sent message: the peer is the recipient
                    (Direction::Outbound, event.recipient.id.clone())
                } else {
                    (Direction::Inbound, event.sender.id.clone())
                };
                events.push(InboundMessage {
                    external_thread_id,
                    external_message_id: message.mid,
                    sender_id: event.sender.id,
                    sender_name: None,
                    body: message.text.unwrap_or_default(),
                    sent_at,
                    direction,
                    external_account_id: Some(entry.id.clone()),
                });
            }
        }
        Ok(events)
    }

    fn verify_signature(&self, signature: Option<&str>, body: &[u8]) -> SignatureValidation {
        let Some(secret) = self.credentials.app_secret.as_deref() else {
            return SignatureValidation::NotConfigured;
        };
        let Some(signature) = signature else {
            return SignatureValidation::Missing;
        };
        let Some(hex_part) = signature.strip_prefix("sha256=") else {
            return SignatureValidation::Invalid;
        };
        if verify_hmac_sha256(secret, hex_part, body) {
            SignatureValidation::Valid
        } else {
            SignatureValidation::Invalid
        }
    }

    fn verify_subscription(&self, verify_token: &str) -> bool {
        self.credentials.verify_token.as_deref() == Some(verify_token)
    }
}
