//! OAuth endpoints: start redirects the browser to the platform, callback
//! completes the connection and bounces back to the admin UI.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use log::{info, warn};
use serde::Deserialize;
use social::Platform;

use crate::handlers::api_error;
use crate::state::SharedState;

pub async fn start_handler(
    State(state): State<SharedState>,
    Path(platform): Path<String>,
) -> Response {
    let Some(platform) = Platform::parse(&platform) else {
        return api_error(StatusCode::NOT_FOUND, format!("unknown platform: {platform}"));
    };

    let connections = state.connections.clone();
    let result =
        tokio::task::spawn_blocking(move || connections.begin_authorization(platform)).await;
    match result {
        Ok(Ok(start)) => Redirect::temporary(&start.authorize_url).into_response(),
        Ok(Err(e)) => crate::handlers::social_error(e),
        Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

#[derive(Deserialize)]
pub struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    /// Set when the user denied the consent screen
    error: Option<String>,
}

pub async fn callback_handler(
    State(state): State<SharedState>,
    Query(params): Query<CallbackQuery>,
) -> Response {
    let ui = state.config.ui_return_url.clone();

    if let Some(error) = params.error {
        warn!("Authorization denied: {error}");
        return Redirect::temporary(&format!("{ui}?error={error}")).into_response();
    }
    let (Some(code), Some(oauth_state)) = (params.code, params.state) else {
        return Redirect::temporary(&format!("{ui}?error=missing_parameters")).into_response();
    };

    let connections = state.connections.clone();
    let result = tokio::task::spawn_blocking(move || {
        connections.complete_authorization(&oauth_state, &code)
    })
    .await;

    match result {
        Ok(Ok(connection)) => {
            info!(
                "Connected {} account {}",
                connection.platform, connection.display_name
            );
            Redirect::temporary(&format!("{ui}?connected={}", connection.id.as_str()))
                .into_response()
        }
        Ok(Err(e)) => {
            warn!("Authorization failed: {e}");
            Redirect::temporary(&format!("{ui}?error=authorization_failed")).into_response()
        }
        Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}
