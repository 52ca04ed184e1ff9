//! Reconciliation of webhook events and poll pages into the store

mod engine;
mod locks;

pub use engine::{IngestStats, PollOutcome, PollStats, SyncEngine};
pub use locks::ConversationLocks;
