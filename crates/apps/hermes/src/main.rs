//! Hermes - unified social inbox service
//!
//! Connects external messaging platforms (Facebook pages today) to a local
//! unified store and serves the admin dashboard's state API, webhook
//! endpoints, OAuth flow and live event stream.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use social::{
    ActionHandler, AlertSink, ConnectionManager, ConnectionStatus, DemoPlatform, FacebookClient,
    LogAlertSink, PlatformRegistry, SocialConfig, SocialError, SocialStore, SqliteSocialStore,
    SyncEngine, WebhookAlertSink,
};
use tokio::sync::broadcast;

mod handlers;
mod router;
mod state;

use state::{AppState, SharedState, WsEvent};

const DB_FILE: &str = "hermes.db";

/// Cap for the rate-limit backoff between polls of one connection
const MAX_BACKOFF_SECS: u64 = 900;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    // Bootstrap config directory
    if let Err(e) = config::init() {
        error!("Failed to initialize config directory: {}", e);
    }

    let cfg = match SocialConfig::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(
                "No usable configuration: {e}\n\
                 Either place platform credentials at {:?}\n\
                 or set HERMES_REDIRECT_URI (plus FACEBOOK_CLIENT_ID / FACEBOOK_CLIENT_SECRET)",
                config::config_path("platforms.json")
            );
            return Err(e);
        }
    };

    let db_path = config::config_path(DB_FILE)
        .ok_or_else(|| anyhow::anyhow!("could not determine config directory"))?;
    let store: Arc<dyn SocialStore> = Arc::new(SqliteSocialStore::new(&db_path)?);
    info!("Opened store at {}", db_path.display());

    let mut registry = PlatformRegistry::new();
    if let Some(creds) = cfg.facebook.clone() {
        registry.register(Arc::new(FacebookClient::new(creds)));
        info!("Facebook platform registered");
    } else {
        warn!("Facebook credentials not configured; Facebook connections disabled");
    }
    registry.register(Arc::new(DemoPlatform::new()));
    let registry = Arc::new(registry);

    let alerts: Arc<dyn AlertSink> = match &cfg.alert_webhook_url {
        Some(url) => Arc::new(WebhookAlertSink::new(url.clone())),
        None => Arc::new(LogAlertSink),
    };

    let connections = Arc::new(ConnectionManager::new(
        store.clone(),
        registry.clone(),
        cfg.redirect_uri.clone(),
    ));
    let engine = Arc::new(SyncEngine::new(
        store.clone(),
        registry.clone(),
        connections.clone(),
        alerts,
    ));
    let actions = Arc::new(ActionHandler::new(store.clone(), engine.clone()));

    let (ws_tx, _) = broadcast::channel::<WsEvent>(256);
    spawn_event_bridge(store.clone(), ws_tx.clone());

    let app_state: SharedState = Arc::new(AppState {
        config: cfg.clone(),
        store,
        platforms: registry,
        connections,
        engine,
        actions,
        ws_tx,
    });

    tokio::spawn(background_poller(app_state.clone()));

    let app = router::build_router(app_state);
    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr).await?;
    info!("Hermes listening on {}", cfg.bind_addr);
    axum::serve(listener, app).await?;
    Ok(())
}

/// Forward store change events onto the WebSocket broadcast channel.
///
/// The store side is a blocking std channel, so the bridge gets a plain
/// thread. Send errors just mean nobody is listening.
fn spawn_event_bridge(store: Arc<dyn SocialStore>, ws_tx: broadcast::Sender<WsEvent>) {
    let rx = store.subscribe();
    std::thread::spawn(move || {
        while let Ok(event) = rx.recv() {
            let _ = ws_tx.send(WsEvent::from(event));
        }
    });
}

/// Periodically poll every active connection.
///
/// Rate limiting backs a connection off exponentially (capped); any
/// successful poll resets its backoff. Non-active connections are skipped
/// without resetting anything.
async fn background_poller(state: SharedState) {
    let interval = Duration::from_secs(state.config.poll_interval_secs.max(5));
    let mut backoff: HashMap<String, u64> = HashMap::new();
    let mut skip_until: HashMap<String, std::time::Instant> = HashMap::new();

    loop {
        tokio::time::sleep(interval).await;

        let store = state.store.clone();
        let connections =
            match tokio::task::spawn_blocking(move || store.list_connections()).await {
                Ok(Ok(connections)) => connections,
                Ok(Err(e)) => {
                    error!("Poller could not list connections: {e}");
                    continue;
                }
                Err(e) => {
                    error!("Poller join error: {e}");
                    continue;
                }
            };

        // One task per connection; the engine's in-flight guard keeps any
        // single connection from overlapping itself
        let mut polls = Vec::new();
        for connection in connections {
            if connection.status != ConnectionStatus::Active {
                continue;
            }
            let key = connection.id.as_str().to_string();
            if let Some(until) = skip_until.get(&key)
                && std::time::Instant::now() < *until
            {
                continue;
            }

            let engine = state.engine.clone();
            let id = connection.id.clone();
            let handle = tokio::task::spawn_blocking(move || engine.poll_conversations(&id, None));
            polls.push((key, handle));
        }

        for (key, handle) in polls {
            match handle.await {
                Ok(Ok(_)) => {
                    backoff.remove(&key);
                    skip_until.remove(&key);
                }
                Ok(Err(SocialError::RateLimited { retry_after })) => {
                    let base = backoff
                        .get(&key)
                        .map(|b| (b * 2).min(MAX_BACKOFF_SECS))
                        .unwrap_or(state.config.poll_interval_secs);
                    let wait = retry_after.unwrap_or(base).min(MAX_BACKOFF_SECS);
                    warn!("Rate limited polling {key}; backing off {wait}s");
                    backoff.insert(key.clone(), wait);
                    skip_until.insert(key, std::time::Instant::now() + Duration::from_secs(wait));
                }
                Ok(Err(SocialError::CredentialExpired)) => {
                    // Alert already raised by the engine; stop polling until
                    // the row leaves `active`
                    warn!("Credentials expired for connection {key}");
                }
                Ok(Err(e)) => warn!("Poll failed for connection {key}: {e}"),
                Err(e) => error!("Poll join error for connection {key}: {e}"),
            }
        }
    }
}
