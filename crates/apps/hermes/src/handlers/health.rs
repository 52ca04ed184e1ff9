//! Health check endpoint.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use social::ConnectionStatus;

use crate::state::SharedState;

pub async fn health_handler(State(state): State<SharedState>) -> impl IntoResponse {
    let store = state.store.clone();
    let (connections, active) = tokio::task::spawn_blocking(move || {
        let connections = store.list_connections().unwrap_or_default();
        let active = connections
            .iter()
            .filter(|c| c.status == ConnectionStatus::Active)
            .count();
        (connections.len(), active)
    })
    .await
    .unwrap_or((0, 0));

    let body = serde_json::json!({
        "status": "ok",
        "connections": connections,
        "active_connections": active,
        "ws_subscribers": state.ws_tx.receiver_count(),
    });
    (StatusCode::OK, axum::Json(body))
}
