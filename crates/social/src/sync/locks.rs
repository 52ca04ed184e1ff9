//! Per-conversation serialization for concurrent writers

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Hands out one mutex per (connection, external thread) pair.
///
/// Webhook delivery, polling and send confirmation all funnel their
/// read-modify-write of a conversation through the same lock, so the
/// unread rollup and the echo tie-break never race.
#[derive(Default)]
pub struct ConversationLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ConversationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock guarding one external thread of one connection
    pub fn for_thread(&self, connection_id: &str, external_thread_id: &str) -> Arc<Mutex<()>> {
        let key = format!("{connection_id}:{external_thread_id}");
        let mut locks = self.locks.lock().unwrap();
        locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
