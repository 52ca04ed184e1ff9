//! Shared application state

use std::sync::Arc;

use social::{
    ActionHandler, ConnectionManager, PlatformRegistry, SocialConfig, SocialStore, SyncEngine,
};
use tokio::sync::broadcast;

/// Events broadcast to connected WebSocket clients.
///
/// Mirrors the store's [`social::ChangeEvent`] stream, bridged onto a
/// tokio broadcast channel so each socket gets its own receiver.
#[derive(Clone, Debug, serde::Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsEvent {
    ConnectionUpdated { connection_id: String },
    ConversationUpdated { conversation_id: String },
    MessageAdded { conversation_id: String, message_id: String },
    MessageUpdated { conversation_id: String, message_id: String },
    MessageRemoved { conversation_id: String, message_id: String },
}

impl From<social::ChangeEvent> for WsEvent {
    fn from(event: social::ChangeEvent) -> Self {
        use social::ChangeEvent::*;
        match event {
            ConnectionUpdated { connection_id } => WsEvent::ConnectionUpdated { connection_id },
            ConversationUpdated { conversation_id } => {
                WsEvent::ConversationUpdated { conversation_id }
            }
            MessageAdded {
                conversation_id,
                message_id,
            } => WsEvent::MessageAdded {
                conversation_id,
                message_id,
            },
            MessageUpdated {
                conversation_id,
                message_id,
            } => WsEvent::MessageUpdated {
                conversation_id,
                message_id,
            },
            MessageRemoved {
                conversation_id,
                message_id,
            } => WsEvent::MessageRemoved {
                conversation_id,
                message_id,
            },
        }
    }
}

pub struct AppState {
    pub config: SocialConfig,
    pub store: Arc<dyn SocialStore>,
    pub platforms: Arc<PlatformRegistry>,
    pub connections: Arc<ConnectionManager>,
    pub engine: Arc<SyncEngine>,
    pub actions: Arc<ActionHandler>,
    pub ws_tx: broadcast::Sender<WsEvent>,
}

pub type SharedState = Arc<AppState>;
