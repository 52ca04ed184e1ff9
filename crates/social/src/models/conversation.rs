//! Conversation model representing a unified message thread

use super::ConnectionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique local identifier for a conversation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh local identifier
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ConversationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConversationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A participant identity within a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    /// Platform-native participant identifier
    pub id: String,
    /// Display name, when the platform provides one
    pub name: Option<String>,
}

impl Participant {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
        }
    }

    pub fn with_name(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: Some(name.into()),
        }
    }

    /// Format the participant for display
    pub fn display(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => self.id.clone(),
        }
    }
}

/// A unified thread: one per external thread per connection
///
/// `(connection_id, external_thread_id)` uniquely identifies a
/// conversation. `unread_count` never goes below zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    /// Local identifier
    pub id: ConversationId,
    /// Owning connection
    pub connection_id: ConnectionId,
    /// Platform-native thread identifier
    pub external_thread_id: String,
    /// Participant identities, in platform order
    pub participants: Vec<Participant>,
    /// Timestamp of the most recent message
    pub last_message_at: DateTime<Utc>,
    /// Number of inbound messages not yet marked read
    pub unread_count: u32,
}

impl Conversation {
    pub fn new(
        connection_id: ConnectionId,
        external_thread_id: impl Into<String>,
        participants: Vec<Participant>,
        last_message_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ConversationId::generate(),
            connection_id,
            external_thread_id: external_thread_id.into(),
            participants,
            last_message_at,
            unread_count: 0,
        }
    }

    /// Add a participant if it is not already present
    pub fn merge_participant(&mut self, participant: Participant) {
        if !self.participants.iter().any(|p| p.id == participant.id) {
            self.participants.push(participant);
        }
    }
}
