//! Domain models for the unified social data layer

mod connection;
mod conversation;
mod cursor;
mod message;

pub use connection::{Connection, ConnectionId, ConnectionStatus, Platform};
pub use conversation::{Conversation, ConversationId, Participant};
pub use cursor::PollCursor;
pub use message::{DeliveryState, Direction, Message, MessageBuilder, MessageId};
