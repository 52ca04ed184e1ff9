//! Social crate - Connection and conversation sync for external platforms
//!
//! This crate provides platform-independent messaging functionality:
//! - Domain models (Connection, Conversation, Message, PollCursor)
//! - Platform clients behind one trait (Facebook, scriptable demo)
//! - OAuth connection lifecycle with single-flight token refresh
//! - Storage trait abstractions with change notification
//! - Idempotent sync engine reconciling webhooks and polls
//! - Query API for UI consumption
//! - Action handlers for mutations (mark read, send)
//!
//! This crate has zero HTTP-server dependencies; the hermes app wraps it
//! in an async web surface.

pub mod actions;
pub mod alerts;
pub mod config;
pub mod connection;
pub mod error;
pub mod models;
pub mod platform;
pub mod query;
pub mod store;
pub mod sync;

pub use actions::ActionHandler;
pub use alerts::{AlertSink, LogAlertSink, WebhookAlertSink};
pub use config::{PlatformCredentials, SocialConfig};
pub use connection::{AuthorizationStart, ConnectionManager};
pub use error::SocialError;
pub use models::{
    Connection, ConnectionId, ConnectionStatus, Conversation, ConversationId, DeliveryState,
    Direction, Message, MessageBuilder, MessageId, Participant, Platform, PollCursor,
};
pub use platform::{
    AccountIdentity, ConversationPage, DemoPlatform, FacebookClient, InboundMessage,
    PlatformClient, PlatformRegistry, RemoteConversation, SignatureValidation, TokenGrant,
    sign_hmac_sha256,
};
pub use query::{ConnectionView, ConversationView, MessageView, StateSnapshot, get_state};
pub use store::{ChangeEvent, ChangeNotifier, InMemorySocialStore, SocialStore, SqliteSocialStore};
pub use sync::{IngestStats, PollOutcome, PollStats, SyncEngine};
