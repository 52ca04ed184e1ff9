//! Axum router construction.

use axum::Router;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::SharedState;

/// Build the complete Axum router with all API routes.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        // Health
        .route("/api/health", get(handlers::health::health_handler))
        // Unified state
        .route("/api/state", get(handlers::state::get_state_handler))
        .route("/api/state", post(handlers::state::post_action_handler))
        // OAuth
        .route(
            "/oauth/:platform/start",
            get(handlers::oauth::start_handler),
        )
        .route("/oauth/callback", get(handlers::oauth::callback_handler))
        // Platform webhooks (GET is the subscription handshake)
        .route(
            "/webhooks/:platform",
            get(handlers::webhooks::verify_handler).post(handlers::webhooks::receive_handler),
        )
        // WebSocket event stream
        .route("/api/events", get(handlers::events::ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
