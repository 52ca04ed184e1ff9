//! Read-side views over the unified store
//!
//! Everything a dashboard needs in one snapshot: connections with tokens
//! redacted, conversations newest-first, and a bounded window of recent
//! messages per conversation.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{
    Connection, ConnectionId, ConnectionStatus, Conversation, ConversationId, DeliveryState,
    Direction, Message, MessageId, Participant, Platform,
};
use crate::store::SocialStore;

/// A connection as exposed to readers. Never carries the access token.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionView {
    pub id: ConnectionId,
    pub platform: Platform,
    pub external_account_id: String,
    pub display_name: String,
    pub status: ConnectionStatus,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<Connection> for ConnectionView {
    fn from(connection: Connection) -> Self {
        Self {
            id: connection.id,
            platform: connection.platform,
            external_account_id: connection.external_account_id,
            display_name: connection.display_name,
            status: connection.status,
            token_expires_at: connection.token_expires_at,
            created_at: connection.created_at,
        }
    }
}

/// A conversation plus the read-only flag derived from its connection
#[derive(Debug, Clone, Serialize)]
pub struct ConversationView {
    pub id: ConversationId,
    pub connection_id: ConnectionId,
    pub external_thread_id: String,
    pub participants: Vec<Participant>,
    pub last_message_at: DateTime<Utc>,
    pub unread_count: u32,
    /// History stays readable after disconnect or expiry, but no new
    /// messages can be sent
    pub read_only: bool,
}

impl ConversationView {
    fn new(conversation: Conversation, connection_status: Option<ConnectionStatus>) -> Self {
        let read_only = connection_status != Some(ConnectionStatus::Active);
        Self {
            id: conversation.id,
            connection_id: conversation.connection_id,
            external_thread_id: conversation.external_thread_id,
            participants: conversation.participants,
            last_message_at: conversation.last_message_at,
            unread_count: conversation.unread_count,
            read_only,
        }
    }
}

/// A message as exposed to readers
#[derive(Debug, Clone, Serialize)]
pub struct MessageView {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub external_message_id: Option<String>,
    pub direction: Direction,
    pub sender_id: String,
    pub body: String,
    pub sent_at: DateTime<Utc>,
    pub delivery_state: DeliveryState,
}

impl From<Message> for MessageView {
    fn from(message: Message) -> Self {
        Self {
            id: message.id,
            conversation_id: message.conversation_id,
            external_message_id: message.external_message_id,
            direction: message.direction,
            sender_id: message.sender_id,
            body: message.body,
            sent_at: message.sent_at,
            delivery_state: message.delivery_state,
        }
    }
}

/// One coherent read of the whole unified state
#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub connections: Vec<ConnectionView>,
    pub conversations: Vec<ConversationView>,
    /// Recent messages across the returned conversations, grouped by
    /// conversation, oldest first within each
    pub messages: Vec<MessageView>,
}

/// Assemble a snapshot: all connections, up to `max_conversations`
/// newest-first, and the last `messages_per_conversation` of each.
pub fn get_state(
    store: &Arc<dyn SocialStore>,
    max_conversations: usize,
    messages_per_conversation: usize,
) -> Result<StateSnapshot> {
    let connections = store.list_connections()?;
    let conversations = store.list_conversations(max_conversations, 0)?;

    let mut messages = Vec::new();
    let mut conversation_views = Vec::with_capacity(conversations.len());
    for conversation in conversations {
        for message in store.list_recent_messages(&conversation.id, messages_per_conversation)? {
            messages.push(MessageView::from(message));
        }
        let status = connections
            .iter()
            .find(|c| c.id == conversation.connection_id)
            .map(|c| c.status);
        conversation_views.push(ConversationView::new(conversation, status));
    }

    Ok(StateSnapshot {
        connections: connections.into_iter().map(ConnectionView::from).collect(),
        conversations: conversation_views,
        messages,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Platform;
    use crate::store::InMemorySocialStore;

    fn store_with_data() -> (Arc<dyn SocialStore>, Connection, Conversation) {
        let store: Arc<dyn SocialStore> = Arc::new(InMemorySocialStore::new());
        let connection =
            Connection::pending(Platform::Demo).activated("acct-1", "Demo", "secret-token", None);
        store.insert_connection(connection.clone()).unwrap();
        let conversation = Conversation::new(
            connection.id.clone(),
            "t-1",
            vec![Participant::new("peer-1")],
            Utc::now(),
        );
        store.upsert_conversation(conversation.clone()).unwrap();
        store
            .insert_message_if_absent(Message::inbound(
                conversation.id.clone(),
                "m-1",
                "peer-1",
                "hello",
                Utc::now(),
            ))
            .unwrap();
        (store, connection, conversation)
    }

    #[test]
    fn test_snapshot_redacts_tokens() {
        let (store, _connection, _conversation) = store_with_data();
        let snapshot = get_state(&store, 50, 20).unwrap();
        assert_eq!(snapshot.connections.len(), 1);

        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(!json.contains("secret-token"));
    }

    #[test]
    fn test_snapshot_contents() {
        let (store, connection, conversation) = store_with_data();
        let snapshot = get_state(&store, 50, 20).unwrap();

        assert_eq!(snapshot.conversations.len(), 1);
        assert_eq!(snapshot.conversations[0].id, conversation.id);
        assert!(!snapshot.conversations[0].read_only);
        assert_eq!(snapshot.messages.len(), 1);
        assert_eq!(snapshot.messages[0].body, "hello");
        assert_eq!(snapshot.connections[0].id, connection.id);
    }

    #[test]
    fn test_inactive_connection_marks_read_only() {
        let (store, connection, _conversation) = store_with_data();
        store
            .update_connection_status(&connection.id, ConnectionStatus::Revoked)
            .unwrap();

        let snapshot = get_state(&store, 50, 20).unwrap();
        // History survives disconnect but goes read-only
        assert_eq!(snapshot.conversations.len(), 1);
        assert!(snapshot.conversations[0].read_only);
        assert_eq!(snapshot.messages.len(), 1);
    }

    #[test]
    fn test_message_window_bounded() {
        let (store, _connection, conversation) = store_with_data();
        for i in 0..10 {
            store
                .insert_message_if_absent(Message::inbound(
                    conversation.id.clone(),
                    format!("m-extra-{i}"),
                    "peer-1",
                    format!("msg {i}"),
                    Utc::now(),
                ))
                .unwrap();
        }

        let snapshot = get_state(&store, 50, 5).unwrap();
        assert_eq!(snapshot.messages.len(), 5);
        // Most recent window, oldest first
        assert_eq!(snapshot.messages.last().unwrap().body, "msg 9");
    }
}
