//! Platform webhook endpoints.
//!
//! POST acknowledges with 200 as soon as the payload is authenticated;
//! ingestion runs in the background so a slow store never makes the
//! platform retry (and replays are harmless anyway).

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use log::{debug, warn};
use serde::Deserialize;
use social::{ConnectionStatus, Platform, SignatureValidation};

use crate::handlers::api_error;
use crate::state::SharedState;

/// Subscription handshake query (Facebook's `hub.*` convention)
#[derive(Deserialize)]
pub struct VerifyQuery {
    #[serde(rename = "hub.mode")]
    mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    challenge: Option<String>,
}

pub async fn verify_handler(
    State(state): State<SharedState>,
    Path(platform): Path<String>,
    axum::extract::Query(params): axum::extract::Query<VerifyQuery>,
) -> Response {
    let Some(platform) = Platform::parse(&platform) else {
        return api_error(StatusCode::NOT_FOUND, format!("unknown platform: {platform}"));
    };
    let Ok(client) = state.platforms.get(platform) else {
        return api_error(StatusCode::NOT_FOUND, format!("platform not configured: {platform}"));
    };

    let token_ok = params.mode.as_deref() == Some("subscribe")
        && params
            .verify_token
            .as_deref()
            .is_some_and(|t| client.verify_subscription(t));
    if token_ok && let Some(challenge) = params.challenge {
        return (StatusCode::OK, challenge).into_response();
    }
    warn!("Rejected webhook subscription handshake for {platform}");
    api_error(StatusCode::FORBIDDEN, "verification failed")
}

pub async fn receive_handler(
    State(state): State<SharedState>,
    Path(platform): Path<String>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    let Some(platform) = Platform::parse(&platform) else {
        return api_error(StatusCode::NOT_FOUND, format!("unknown platform: {platform}"));
    };
    let Ok(client) = state.platforms.get(platform) else {
        return api_error(StatusCode::NOT_FOUND, format!("platform not configured: {platform}"));
    };

    let signature = headers
        .get("x-hub-signature-256")
        .and_then(|v| v.to_str().ok());
    match client.verify_signature(signature, &body) {
        SignatureValidation::Valid => {}
        SignatureValidation::NotConfigured => {
            warn!("No webhook secret configured for {platform}; accepting unsigned payload");
        }
        validation @ (SignatureValidation::Invalid | SignatureValidation::Missing) => {
            warn!("Rejected {platform} webhook: signature {validation:?}");
            return api_error(StatusCode::FORBIDDEN, "invalid signature");
        }
    }

    // Acknowledge now; reconcile in the background
    tokio::task::spawn_blocking(move || {
        let connections = match state.store.list_connections() {
            Ok(connections) => connections,
            Err(e) => {
                warn!("Webhook ingest could not list connections: {e}");
                return;
            }
        };
        let targets: Vec<_> = connections
            .into_iter()
            .filter(|c| c.platform == platform && c.status == ConnectionStatus::Active)
            .collect();
        if targets.is_empty() {
            debug!("Dropping {platform} webhook: no active connection");
        }
        // Each connection's ingest keeps only the events addressed to its
        // own account, so offering the payload to every connection is safe
        for connection in targets {
            match state.engine.ingest_webhook_event(&connection.id, &body) {
                Ok(stats) => debug!(
                    "Webhook ingest on {}: {} applied, {} duplicate(s), {} ignored",
                    connection.id.as_str(),
                    stats.applied,
                    stats.duplicates,
                    stats.ignored
                ),
                Err(e) => warn!(
                    "Webhook ingest failed on {}: {e}",
                    connection.id.as_str()
                ),
            }
        }
    });

    (StatusCode::OK, axum::Json(serde_json::json!({ "received": true }))).into_response()
}
