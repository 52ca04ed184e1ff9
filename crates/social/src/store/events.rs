//! Change notification for store mutations
//!
//! Every successful mutation emits a [`ChangeEvent`] carrying the affected
//! entity's identifiers. Readers subscribe instead of polling; the server
//! layer forwards events to connected UI sessions.

use std::sync::Mutex;
use std::sync::mpsc::{Receiver, Sender, channel};

use serde::Serialize;

/// A change to the unified store
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChangeEvent {
    ConnectionUpdated {
        connection_id: String,
    },
    ConversationUpdated {
        conversation_id: String,
    },
    MessageAdded {
        conversation_id: String,
        message_id: String,
    },
    MessageUpdated {
        conversation_id: String,
        message_id: String,
    },
    MessageRemoved {
        conversation_id: String,
        message_id: String,
    },
}

/// Fan-out of change events to any number of subscribers
///
/// Subscribers that have dropped their receiver are pruned on the next
/// emit. Emitting never blocks: channels are unbounded.
#[derive(Default)]
pub struct ChangeNotifier {
    subscribers: Mutex<Vec<Sender<ChangeEvent>>>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber
    pub fn subscribe(&self) -> Receiver<ChangeEvent> {
        let (tx, rx) = channel();
        self.subscribers.lock().unwrap().push(tx);
        rx
    }

    /// Deliver an event to all live subscribers
    pub fn emit(&self, event: ChangeEvent) {
        let mut subs = self.subscribers.lock().unwrap();
        subs.retain(|tx| tx.send(event.clone()).is_ok());
    }
}
