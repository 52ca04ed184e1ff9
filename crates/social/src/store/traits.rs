//! Storage trait definitions

use std::sync::mpsc::Receiver;

use crate::models::{
    Connection, ConnectionId, ConnectionStatus, Conversation, ConversationId, DeliveryState,
    Message, MessageId, Platform, PollCursor,
};
use crate::store::events::ChangeEvent;
use anyhow::Result;
use chrono::{DateTime, Utc};

/// Trait for unified social storage
///
/// Abstracts over in-memory and SQLite backends. All mutations emit a
/// [`ChangeEvent`] on success. Uniqueness contracts the backends enforce:
/// at most one `active` connection per (platform, external account), one
/// conversation per (connection, external thread), and insert-or-ignore
/// keyed on (conversation, external message id).
pub trait SocialStore: Send + Sync {
    // === Connections ===

    /// Insert a new connection row
    fn insert_connection(&self, connection: Connection) -> Result<()>;

    /// Get a connection by local id
    fn get_connection(&self, id: &ConnectionId) -> Result<Option<Connection>>;

    /// Find the `active` connection for a platform identity, if any
    fn find_active_connection(
        &self,
        platform: Platform,
        external_account_id: &str,
    ) -> Result<Option<Connection>>;

    /// List all connections, newest first
    fn list_connections(&self) -> Result<Vec<Connection>>;

    /// Replace a connection's token in place
    fn update_connection_token(
        &self,
        id: &ConnectionId,
        access_token: &str,
        token_expires_at: Option<DateTime<Utc>>,
    ) -> Result<()>;

    /// Transition a connection's lifecycle status
    fn update_connection_status(&self, id: &ConnectionId, status: ConnectionStatus) -> Result<()>;

    // === Conversations ===

    /// Insert or update a conversation
    fn upsert_conversation(&self, conversation: Conversation) -> Result<()>;

    /// Get a conversation by local id
    fn get_conversation(&self, id: &ConversationId) -> Result<Option<Conversation>>;

    /// Find a conversation by its unique (connection, external thread) key
    fn find_conversation(
        &self,
        connection_id: &ConnectionId,
        external_thread_id: &str,
    ) -> Result<Option<Conversation>>;

    /// List conversations ordered by last_message_at descending
    fn list_conversations(&self, limit: usize, offset: usize) -> Result<Vec<Conversation>>;

    /// Set a conversation's unread count to zero (idempotent)
    fn mark_read(&self, id: &ConversationId) -> Result<()>;

    // === Messages ===

    /// Insert a message unless one with the same
    /// (conversation, external message id) already exists.
    ///
    /// Returns true if the message was inserted, false if it was a
    /// duplicate. Messages without an external id always insert.
    fn insert_message_if_absent(&self, message: Message) -> Result<bool>;

    /// Get a message by local id
    fn get_message(&self, id: &MessageId) -> Result<Option<Message>>;

    /// Find a message by its platform-native id within a conversation
    fn find_message_by_external(
        &self,
        conversation_id: &ConversationId,
        external_message_id: &str,
    ) -> Result<Option<Message>>;

    /// The most recent `limit` messages of a conversation, oldest first
    fn list_recent_messages(
        &self,
        conversation_id: &ConversationId,
        limit: usize,
    ) -> Result<Vec<Message>>;

    /// Attach the platform-assigned id to a provisional message and mark it
    /// `sent`
    fn confirm_message(&self, id: &MessageId, external_message_id: &str) -> Result<()>;

    /// Update a message's delivery state
    fn set_message_delivery(&self, id: &MessageId, state: DeliveryState) -> Result<()>;

    /// Remove a message (provisional record superseded by a webhook echo)
    fn delete_message(&self, id: &MessageId) -> Result<()>;

    /// Count messages in a conversation
    fn count_messages(&self, conversation_id: &ConversationId) -> Result<usize>;

    // === Poll cursors ===

    /// Get the poll cursor for a connection
    fn get_poll_cursor(&self, connection_id: &ConnectionId) -> Result<Option<PollCursor>>;

    /// Save the poll cursor (upsert)
    fn save_poll_cursor(&self, cursor: PollCursor) -> Result<()>;

    // === Change notification ===

    /// Subscribe to change events emitted by this store
    fn subscribe(&self) -> Receiver<ChangeEvent>;

    /// Clear all data (for testing)
    fn clear(&self) -> Result<()>;
}
