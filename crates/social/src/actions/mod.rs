//! User-initiated actions against the unified state

use std::sync::Arc;

use log::debug;

use crate::error::SocialError;
use crate::models::{ConversationId, Message};
use crate::store::SocialStore;
use crate::sync::SyncEngine;

/// Handles dashboard-originated mutations: mark-read and sending
pub struct ActionHandler {
    store: Arc<dyn SocialStore>,
    engine: Arc<SyncEngine>,
}

impl ActionHandler {
    pub fn new(store: Arc<dyn SocialStore>, engine: Arc<SyncEngine>) -> Self {
        Self { store, engine }
    }

    /// Zero a conversation's unread count. Idempotent.
    pub fn mark_read(&self, conversation_id: &ConversationId) -> Result<(), SocialError> {
        if self.store.get_conversation(conversation_id)?.is_none() {
            return Err(SocialError::NotFound(format!(
                "conversation {}",
                conversation_id.as_str()
            )));
        }
        self.store.mark_read(conversation_id)?;
        debug!("Marked conversation {} read", conversation_id.as_str());
        Ok(())
    }

    /// Queue an outbound message into a conversation
    pub fn submit_message(
        &self,
        conversation_id: &ConversationId,
        body: &str,
    ) -> Result<Message, SocialError> {
        if body.trim().is_empty() {
            return Err(SocialError::SendFailed("empty message body".to_string()));
        }
        self.engine.send_message(conversation_id, body)
    }
}
