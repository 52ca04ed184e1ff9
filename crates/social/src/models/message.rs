//! Message model representing a unified message within a conversation

use super::ConversationId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique local identifier for a message
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh local identifier (also used as the provisional
    /// identifier for outbound messages awaiting platform confirmation)
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Direction of a message relative to the connected account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "inbound" => Some(Direction::Inbound),
            "outbound" => Some(Direction::Outbound),
            _ => None,
        }
    }
}

/// Delivery state of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryState {
    /// Outbound, not yet confirmed by the platform
    Pending,
    /// Outbound, confirmed by the platform
    Sent,
    /// Outbound, rejected by the platform; kept visible
    Failed,
    /// Inbound
    Received,
}

impl DeliveryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryState::Pending => "pending",
            DeliveryState::Sent => "sent",
            DeliveryState::Failed => "failed",
            DeliveryState::Received => "received",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(DeliveryState::Pending),
            "sent" => Some(DeliveryState::Sent),
            "failed" => Some(DeliveryState::Failed),
            "received" => Some(DeliveryState::Received),
            _ => None,
        }
    }
}

/// A single unified message within a conversation
///
/// `(conversation_id, external_message_id)` uniquely identifies a message
/// once the platform has assigned an identifier. Outbound messages start
/// with `external_message_id = None` and `delivery_state = Pending`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Local identifier
    pub id: MessageId,
    /// Owning conversation
    pub conversation_id: ConversationId,
    /// Platform-native message identifier, once known
    pub external_message_id: Option<String>,
    pub direction: Direction,
    /// Platform-native sender identifier
    pub sender_id: String,
    pub body: String,
    pub sent_at: DateTime<Utc>,
    pub delivery_state: DeliveryState,
}

impl Message {
    /// Create a message builder
    pub fn builder(conversation_id: ConversationId) -> MessageBuilder {
        MessageBuilder::new(conversation_id)
    }

    /// Build an inbound message confirmed by the platform
    pub fn inbound(
        conversation_id: ConversationId,
        external_message_id: impl Into<String>,
        sender_id: impl Into<String>,
        body: impl Into<String>,
        sent_at: DateTime<Utc>,
    ) -> Self {
        Self::builder(conversation_id)
            .external_message_id(external_message_id)
            .direction(Direction::Inbound)
            .sender_id(sender_id)
            .body(body)
            .sent_at(sent_at)
            .delivery_state(DeliveryState::Received)
            .build()
    }

    /// Build a provisional outbound message awaiting confirmation
    pub fn outbound_pending(
        conversation_id: ConversationId,
        sender_id: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self::builder(conversation_id)
            .direction(Direction::Outbound)
            .sender_id(sender_id)
            .body(body)
            .delivery_state(DeliveryState::Pending)
            .build()
    }
}

/// Builder for creating Message instances
pub struct MessageBuilder {
    id: MessageId,
    conversation_id: ConversationId,
    external_message_id: Option<String>,
    direction: Direction,
    sender_id: String,
    body: String,
    sent_at: Option<DateTime<Utc>>,
    delivery_state: DeliveryState,
}

impl MessageBuilder {
    fn new(conversation_id: ConversationId) -> Self {
        Self {
            id: MessageId::generate(),
            conversation_id,
            external_message_id: None,
            direction: Direction::Inbound,
            sender_id: String::new(),
            body: String::new(),
            sent_at: None,
            delivery_state: DeliveryState::Received,
        }
    }

    pub fn id(mut self, id: MessageId) -> Self {
        self.id = id;
        self
    }

    pub fn external_message_id(mut self, id: impl Into<String>) -> Self {
        self.external_message_id = Some(id.into());
        self
    }

    pub fn direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    pub fn sender_id(mut self, sender_id: impl Into<String>) -> Self {
        self.sender_id = sender_id.into();
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn sent_at(mut self, sent_at: DateTime<Utc>) -> Self {
        self.sent_at = Some(sent_at);
        self
    }

    pub fn delivery_state(mut self, state: DeliveryState) -> Self {
        self.delivery_state = state;
        self
    }

    pub fn build(self) -> Message {
        Message {
            id: self.id,
            conversation_id: self.conversation_id,
            external_message_id: self.external_message_id,
            direction: self.direction,
            sender_id: self.sender_id,
            body: self.body,
            sent_at: self.sent_at.unwrap_or_else(Utc::now),
            delivery_state: self.delivery_state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbound_message() {
        let msg = Message::inbound(
            ConversationId::new("c1"),
            "m-ext-1",
            "u1",
            "hello",
            Utc::now(),
        );
        assert_eq!(msg.direction, Direction::Inbound);
        assert_eq!(msg.delivery_state, DeliveryState::Received);
        assert_eq!(msg.external_message_id.as_deref(), Some("m-ext-1"));
    }

    #[test]
    fn test_outbound_pending_has_provisional_id() {
        let msg = Message::outbound_pending(ConversationId::new("c1"), "page-1", "hi");
        assert_eq!(msg.direction, Direction::Outbound);
        assert_eq!(msg.delivery_state, DeliveryState::Pending);
        assert!(msg.external_message_id.is_none());
        assert!(!msg.id.as_str().is_empty());
    }

    #[test]
    fn test_delivery_state_roundtrip() {
        for state in [
            DeliveryState::Pending,
            DeliveryState::Sent,
            DeliveryState::Failed,
            DeliveryState::Received,
        ] {
            assert_eq!(DeliveryState::parse(state.as_str()), Some(state));
        }
    }
}
