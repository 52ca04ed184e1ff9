//! Storage traits and implementations
//!
//! This module defines the storage abstraction layer for the unified
//! social model. The trait-based design allows swapping between
//! in-memory and persistent storage implementations, and carries the
//! change-notification contract every reader relies on.

mod events;
mod memory;
mod sqlite;
mod traits;

pub use events::{ChangeEvent, ChangeNotifier};
pub use memory::InMemorySocialStore;
pub use sqlite::SqliteSocialStore;
pub use traits::SocialStore;
