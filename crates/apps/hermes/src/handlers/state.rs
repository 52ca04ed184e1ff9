//! Unified state endpoint: one GET for the whole dashboard, one POST for
//! mutations.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use social::{ConnectionId, ConversationId};

use crate::handlers::{api_error, social_error};
use crate::state::SharedState;

const MAX_CONVERSATIONS: usize = 200;
const DEFAULT_CONVERSATIONS: usize = 50;
const DEFAULT_MESSAGES_PER_CONVERSATION: usize = 20;

#[derive(Deserialize)]
pub struct StateQuery {
    conversations: Option<usize>,
    messages: Option<usize>,
}

pub async fn get_state_handler(
    State(state): State<SharedState>,
    Query(params): Query<StateQuery>,
) -> Response {
    let max_conversations = params
        .conversations
        .unwrap_or(DEFAULT_CONVERSATIONS)
        .min(MAX_CONVERSATIONS);
    let messages_per_conversation = params
        .messages
        .unwrap_or(DEFAULT_MESSAGES_PER_CONVERSATION)
        .min(100);

    let store = state.store.clone();
    let result = tokio::task::spawn_blocking(move || {
        social::get_state(&store, max_conversations, messages_per_conversation)
    })
    .await;

    match result {
        Ok(Ok(snapshot)) => (StatusCode::OK, axum::Json(snapshot)).into_response(),
        Ok(Err(e)) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// A mutation against the unified state.
#[derive(Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum StateAction {
    MarkRead {
        conversation_id: String,
    },
    SendMessage {
        conversation_id: String,
        body: String,
    },
    Disconnect {
        connection_id: String,
    },
}

pub async fn post_action_handler(
    State(state): State<SharedState>,
    axum::Json(action): axum::Json<StateAction>,
) -> Response {
    let result = tokio::task::spawn_blocking(move || match action {
        StateAction::MarkRead { conversation_id } => state
            .actions
            .mark_read(&ConversationId::new(conversation_id))
            .map(|()| serde_json::json!({ "success": true })),
        StateAction::SendMessage {
            conversation_id,
            body,
        } => state
            .actions
            .submit_message(&ConversationId::new(conversation_id), &body)
            .map(|message| {
                serde_json::json!({
                    "success": true,
                    "message_id": message.id.as_str(),
                    "delivery_state": message.delivery_state.as_str(),
                })
            }),
        StateAction::Disconnect { connection_id } => state
            .connections
            .disconnect(&ConnectionId::new(connection_id))
            .map(|()| serde_json::json!({ "success": true })),
    })
    .await;

    match result {
        Ok(Ok(body)) => (StatusCode::OK, axum::Json(body)).into_response(),
        Ok(Err(e)) => social_error(e),
        Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}
