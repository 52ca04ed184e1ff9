//! In-memory storage implementation
//!
//! Used for testing and for ephemeral deployments where history does not
//! need to survive a restart.

use anyhow::{Result, anyhow};
use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::mpsc::Receiver;

use super::events::{ChangeEvent, ChangeNotifier};
use super::traits::SocialStore;
use crate::models::{
    Connection, ConnectionId, ConnectionStatus, Conversation, ConversationId, DeliveryState,
    Message, MessageId, Platform, PollCursor,
};
use chrono::{DateTime, Utc};

/// In-memory implementation of [`SocialStore`]
///
/// HashMaps behind RwLocks; uniqueness checks are scans, which is fine at
/// the scale of one clinic's inbox.
#[derive(Default)]
pub struct InMemorySocialStore {
    connections: RwLock<HashMap<String, Connection>>,
    conversations: RwLock<HashMap<String, Conversation>>,
    messages: RwLock<HashMap<String, Message>>,
    /// conversation id -> message ids in insertion order
    conversation_messages: RwLock<HashMap<String, Vec<String>>>,
    cursors: RwLock<HashMap<String, PollCursor>>,
    notifier: ChangeNotifier,
}

impl InMemorySocialStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self::default()
    }
}

impl SocialStore for InMemorySocialStore {
    fn insert_connection(&self, connection: Connection) -> Result<()> {
        let mut connections = self.connections.write().unwrap();
        if connection.status == ConnectionStatus::Active
            && connections.values().any(|c| {
                c.status == ConnectionStatus::Active
                    && c.platform == connection.platform
                    && c.external_account_id == connection.external_account_id
                    && c.id != connection.id
            })
        {
            return Err(anyhow!(
                "active connection already exists for {} account {}",
                connection.platform,
                connection.external_account_id
            ));
        }
        let id = connection.id.as_str().to_string();
        connections.insert(id.clone(), connection);
        drop(connections);
        self.notifier
            .emit(ChangeEvent::ConnectionUpdated { connection_id: id });
        Ok(())
    }

    fn get_connection(&self, id: &ConnectionId) -> Result<Option<Connection>> {
        Ok(self.connections.read().unwrap().get(id.as_str()).cloned())
    }

    fn find_active_connection(
        &self,
        platform: Platform,
        external_account_id: &str,
    ) -> Result<Option<Connection>> {
        Ok(self
            .connections
            .read()
            .unwrap()
            .values()
            .find(|c| {
                c.status == ConnectionStatus::Active
                    && c.platform == platform
                    && c.external_account_id == external_account_id
            })
            .cloned())
    }

    fn list_connections(&self) -> Result<Vec<Connection>> {
        let mut connections: Vec<Connection> =
            self.connections.read().unwrap().values().cloned().collect();
        connections.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(connections)
    }

    fn update_connection_token(
        &self,
        id: &ConnectionId,
        access_token: &str,
        token_expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut connections = self.connections.write().unwrap();
        let connection = connections
            .get_mut(id.as_str())
            .ok_or_else(|| anyhow!("unknown connection {}", id.as_str()))?;
        connection.access_token = access_token.to_string();
        connection.token_expires_at = token_expires_at;
        drop(connections);
        self.notifier.emit(ChangeEvent::ConnectionUpdated {
            connection_id: id.as_str().to_string(),
        });
        Ok(())
    }

    fn update_connection_status(&self, id: &ConnectionId, status: ConnectionStatus) -> Result<()> {
        let mut connections = self.connections.write().unwrap();
        let connection = connections
            .get_mut(id.as_str())
            .ok_or_else(|| anyhow!("unknown connection {}", id.as_str()))?;
        connection.status = status;
        drop(connections);
        self.notifier.emit(ChangeEvent::ConnectionUpdated {
            connection_id: id.as_str().to_string(),
        });
        Ok(())
    }

    fn upsert_conversation(&self, conversation: Conversation) -> Result<()> {
        let id = conversation.id.as_str().to_string();
        self.conversations
            .write()
            .unwrap()
            .insert(id.clone(), conversation);
        self.notifier.emit(ChangeEvent::ConversationUpdated {
            conversation_id: id,
        });
        Ok(())
    }

    fn get_conversation(&self, id: &ConversationId) -> Result<Option<Conversation>> {
        Ok(self.conversations.read().unwrap().get(id.as_str()).cloned())
    }

    fn find_conversation(
        &self,
        connection_id: &ConnectionId,
        external_thread_id: &str,
    ) -> Result<Option<Conversation>> {
        Ok(self
            .conversations
            .read()
            .unwrap()
            .values()
            .find(|c| &c.connection_id == connection_id && c.external_thread_id == external_thread_id)
            .cloned())
    }

    fn list_conversations(&self, limit: usize, offset: usize) -> Result<Vec<Conversation>> {
        let mut conversations: Vec<Conversation> = self
            .conversations
            .read()
            .unwrap()
            .values()
            .cloned()
            .collect();
        conversations.sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));
        Ok(conversations.into_iter().skip(offset).take(limit).collect())
    }

    fn mark_read(&self, id: &ConversationId) -> Result<()> {
        let mut conversations = self.conversations.write().unwrap();
        let conversation = conversations
            .get_mut(id.as_str())
            .ok_or_else(|| anyhow!("unknown conversation {}", id.as_str()))?;
        let changed = conversation.unread_count != 0;
        conversation.unread_count = 0;
        drop(conversations);
        if changed {
            self.notifier.emit(ChangeEvent::ConversationUpdated {
                conversation_id: id.as_str().to_string(),
            });
        }
        Ok(())
    }

    fn insert_message_if_absent(&self, message: Message) -> Result<bool> {
        let mut messages = self.messages.write().unwrap();
        let mut index = self.conversation_messages.write().unwrap();

        if let Some(external_id) = &message.external_message_id {
            let conv_key = message.conversation_id.as_str();
            let duplicate = index
                .get(conv_key)
                .map(|ids| {
                    ids.iter().any(|id| {
                        messages
                            .get(id)
                            .and_then(|m| m.external_message_id.as_deref())
                            == Some(external_id.as_str())
                    })
                })
                .unwrap_or(false);
            if duplicate {
                return Ok(false);
            }
        }

        let conversation_id = message.conversation_id.as_str().to_string();
        let message_id = message.id.as_str().to_string();
        index
            .entry(conversation_id.clone())
            .or_default()
            .push(message_id.clone());
        messages.insert(message_id.clone(), message);
        drop(index);
        drop(messages);

        self.notifier.emit(ChangeEvent::MessageAdded {
            conversation_id,
            message_id,
        });
        Ok(true)
    }

    fn get_message(&self, id: &MessageId) -> Result<Option<Message>> {
        Ok(self.messages.read().unwrap().get(id.as_str()).cloned())
    }

    fn find_message_by_external(
        &self,
        conversation_id: &ConversationId,
        external_message_id: &str,
    ) -> Result<Option<Message>> {
        let messages = self.messages.read().unwrap();
        let index = self.conversation_messages.read().unwrap();
        Ok(index
            .get(conversation_id.as_str())
            .and_then(|ids| {
                ids.iter().find(|id| {
                    messages
                        .get(*id)
                        .and_then(|m| m.external_message_id.as_deref())
                        == Some(external_message_id)
                })
            })
            .and_then(|id| messages.get(id).cloned()))
    }

    fn list_recent_messages(
        &self,
        conversation_id: &ConversationId,
        limit: usize,
    ) -> Result<Vec<Message>> {
        let messages = self.messages.read().unwrap();
        let index = self.conversation_messages.read().unwrap();
        let mut result: Vec<Message> = index
            .get(conversation_id.as_str())
            .map(|ids| ids.iter().filter_map(|id| messages.get(id).cloned()).collect())
            .unwrap_or_default();
        result.sort_by(|a, b| a.sent_at.cmp(&b.sent_at));
        if result.len() > limit {
            result.drain(..result.len() - limit);
        }
        Ok(result)
    }

    fn confirm_message(&self, id: &MessageId, external_message_id: &str) -> Result<()> {
        let mut messages = self.messages.write().unwrap();
        let message = messages
            .get_mut(id.as_str())
            .ok_or_else(|| anyhow!("unknown message {}", id.as_str()))?;
        message.external_message_id = Some(external_message_id.to_string());
        message.delivery_state = DeliveryState::Sent;
        let conversation_id = message.conversation_id.as_str().to_string();
        drop(messages);
        self.notifier.emit(ChangeEvent::MessageUpdated {
            conversation_id,
            message_id: id.as_str().to_string(),
        });
        Ok(())
    }

    fn set_message_delivery(&self, id: &MessageId, state: DeliveryState) -> Result<()> {
        let mut messages = self.messages.write().unwrap();
        let message = messages
            .get_mut(id.as_str())
            .ok_or_else(|| anyhow!("unknown message {}", id.as_str()))?;
        message.delivery_state = state;
        let conversation_id = message.conversation_id.as_str().to_string();
        drop(messages);
        self.notifier.emit(ChangeEvent::MessageUpdated {
            conversation_id,
            message_id: id.as_str().to_string(),
        });
        Ok(())
    }

    fn delete_message(&self, id: &MessageId) -> Result<()> {
        let mut messages = self.messages.write().unwrap();
        let Some(message) = messages.remove(id.as_str()) else {
            return Ok(());
        };
        let conversation_id = message.conversation_id.as_str().to_string();
        let mut index = self.conversation_messages.write().unwrap();
        if let Some(ids) = index.get_mut(&conversation_id) {
            ids.retain(|m| m != id.as_str());
        }
        drop(index);
        drop(messages);
        self.notifier.emit(ChangeEvent::MessageRemoved {
            conversation_id,
            message_id: id.as_str().to_string(),
        });
        Ok(())
    }

    fn count_messages(&self, conversation_id: &ConversationId) -> Result<usize> {
        Ok(self
            .conversation_messages
            .read()
            .unwrap()
            .get(conversation_id.as_str())
            .map(|ids| ids.len())
            .unwrap_or(0))
    }

    fn get_poll_cursor(&self, connection_id: &ConnectionId) -> Result<Option<PollCursor>> {
        Ok(self
            .cursors
            .read()
            .unwrap()
            .get(connection_id.as_str())
            .cloned())
    }

    fn save_poll_cursor(&self, cursor: PollCursor) -> Result<()> {
        self.cursors
            .write()
            .unwrap()
            .insert(cursor.connection_id.as_str().to_string(), cursor);
        Ok(())
    }

    fn subscribe(&self) -> Receiver<ChangeEvent> {
        self.notifier.subscribe()
    }

    fn clear(&self) -> Result<()> {
        self.connections.write().unwrap().clear();
        self.conversations.write().unwrap().clear();
        self.messages.write().unwrap().clear();
        self.conversation_messages.write().unwrap().clear();
        self.cursors.write().unwrap().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn active_connection(acct: &str) -> Connection {
        Connection::pending(Platform::Demo).activated(acct, "Demo", "tok", None)
    }

    #[test]
    fn test_active_uniqueness_enforced() {
        let store = InMemorySocialStore::new();
        store.insert_connection(active_connection("acct-1")).unwrap();
        assert!(store.insert_connection(active_connection("acct-1")).is_err());
        // A different account is fine
        store.insert_connection(active_connection("acct-2")).unwrap();
    }

    #[test]
    fn test_insert_message_if_absent_dedupes_on_external_id() {
        let store = InMemorySocialStore::new();
        let conv = Conversation::new(ConnectionId::new("c1"), "t1", vec![], Utc::now());
        let conv_id = conv.id.clone();
        store.upsert_conversation(conv).unwrap();

        let m1 = Message::inbound(conv_id.clone(), "m1", "u1", "hello", Utc::now());
        let m2 = Message::inbound(conv_id.clone(), "m1", "u1", "hello", Utc::now());
        assert!(store.insert_message_if_absent(m1).unwrap());
        assert!(!store.insert_message_if_absent(m2).unwrap());
        assert_eq!(store.count_messages(&conv_id).unwrap(), 1);
    }

    #[test]
    fn test_provisional_messages_always_insert() {
        let store = InMemorySocialStore::new();
        let conv_id = ConversationId::new("c1");
        let m1 = Message::outbound_pending(conv_id.clone(), "page", "a");
        let m2 = Message::outbound_pending(conv_id.clone(), "page", "b");
        assert!(store.insert_message_if_absent(m1).unwrap());
        assert!(store.insert_message_if_absent(m2).unwrap());
        assert_eq!(store.count_messages(&conv_id).unwrap(), 2);
    }

    #[test]
    fn test_list_conversations_ordering() {
        let store = InMemorySocialStore::new();
        let old = Conversation::new(
            ConnectionId::new("c1"),
            "t-old",
            vec![],
            Utc::now() - chrono::Duration::hours(2),
        );
        let new = Conversation::new(ConnectionId::new("c1"), "t-new", vec![], Utc::now());
        store.upsert_conversation(old).unwrap();
        store.upsert_conversation(new).unwrap();

        let listed = store.list_conversations(10, 0).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].external_thread_id, "t-new");
    }

    #[test]
    fn test_mark_read_idempotent() {
        let store = InMemorySocialStore::new();
        let mut conv = Conversation::new(ConnectionId::new("c1"), "t1", vec![], Utc::now());
        conv.unread_count = 3;
        let id = conv.id.clone();
        store.upsert_conversation(conv).unwrap();

        store.mark_read(&id).unwrap();
        store.mark_read(&id).unwrap();
        assert_eq!(store.get_conversation(&id).unwrap().unwrap().unread_count, 0);
    }

    #[test]
    fn test_change_events_emitted() {
        let store = InMemorySocialStore::new();
        let rx = store.subscribe();
        store.insert_connection(active_connection("acct-1")).unwrap();
        assert!(matches!(
            rx.try_recv().unwrap(),
            ChangeEvent::ConnectionUpdated { .. }
        ));
    }
}
