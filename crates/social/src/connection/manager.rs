//! Connection lifecycle manager
//!
//! Owns the OAuth dance and token upkeep:
//! - `begin_authorization` issues a single-use state token and returns the
//!   platform's authorize URL
//! - `complete_authorization` consumes the state, exchanges the code,
//!   resolves identity and produces exactly one `Active` connection per
//!   platform identity
//! - `get_valid_token` refreshes near-expiry tokens with single-flight
//!   semantics so concurrent sync work triggers at most one refresh
//! - `disconnect` revokes locally first and treats platform revocation as
//!   best effort

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use log::{info, warn};

use crate::error::SocialError;
use crate::models::{Connection, ConnectionId, ConnectionStatus, Platform};
use crate::platform::PlatformRegistry;
use crate::store::SocialStore;

/// How long an issued authorization state stays redeemable
const STATE_TTL_MINUTES: i64 = 10;

/// Refresh tokens this many seconds before their stated expiry
const TOKEN_EXPIRY_SKEW_SECS: i64 = 60;

/// An authorization attempt awaiting its callback
struct PendingAuthorization {
    platform: Platform,
    expires_at: DateTime<Utc>,
}

/// What `begin_authorization` hands back to the caller
#[derive(Debug, Clone)]
pub struct AuthorizationStart {
    pub authorize_url: String,
    pub state: String,
}

pub struct ConnectionManager {
    store: Arc<dyn SocialStore>,
    platforms: Arc<PlatformRegistry>,
    redirect_uri: String,
    /// Outstanding state tokens; an attempt lives here, not in the store,
    /// until its callback lands
    pending: Mutex<HashMap<String, PendingAuthorization>>,
    /// Per-connection refresh locks for single-flight token refresh
    refresh_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ConnectionManager {
    pub fn new(
        store: Arc<dyn SocialStore>,
        platforms: Arc<PlatformRegistry>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            store,
            platforms,
            redirect_uri: redirect_uri.into(),
            pending: Mutex::new(HashMap::new()),
            refresh_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Start an authorization attempt for a platform.
    ///
    /// The returned state token is single-use and expires after
    /// [`STATE_TTL_MINUTES`].
    pub fn begin_authorization(&self, platform: Platform) -> Result<AuthorizationStart, SocialError> {
        let client = self.platforms.get(platform)?;
        let state = uuid::Uuid::new_v4().to_string();
        let authorize_url = client.authorize_url(&state, &self.redirect_uri);

        let mut pending = self.pending.lock().unwrap();
        // Opportunistic cleanup of attempts nobody completed
        let now = Utc::now();
        pending.retain(|_, p| p.expires_at > now);
        pending.insert(
            state.clone(),
            PendingAuthorization {
                platform,
                expires_at: now + Duration::minutes(STATE_TTL_MINUTES),
            },
        );

        info!("Started {platform} authorization");
        Ok(AuthorizationStart {
            authorize_url,
            state,
        })
    }

    /// Complete an authorization attempt from its OAuth callback.
    ///
    /// Consumes the state token, exchanges the code and resolves the account
    /// identity. If an `Active` connection already exists for that identity
    /// the new token replaces the old one in place and no second connection
    /// appears.
    pub fn complete_authorization(
        &self,
        state: &str,
        code: &str,
    ) -> Result<Connection, SocialError> {
        let platform = {
            let mut pending = self.pending.lock().unwrap();
            let attempt = pending.remove(state).ok_or(SocialError::InvalidState)?;
            if attempt.expires_at <= Utc::now() {
                return Err(SocialError::InvalidState);
            }
            attempt.platform
        };

        let client = self.platforms.get(platform)?;
        let grant = client.exchange_code(code, &self.redirect_uri)?;
        let identity = client.fetch_identity(&grant.access_token)?;

        // Some platforms hand out a narrower per-account token during
        // identity lookup; prefer it for all further traffic.
        let access_token = identity
            .access_token
            .unwrap_or_else(|| grant.access_token.clone());

        if let Some(existing) =
            self.store
                .find_active_connection(platform, &identity.external_account_id)?
        {
            self.store
                .update_connection_token(&existing.id, &access_token, grant.expires_at)?;
            info!(
                "Re-authorized {platform} connection {} ({})",
                existing.id.as_str(),
                identity.display_name
            );
            return Ok(self
                .store
                .get_connection(&existing.id)?
                .ok_or_else(|| SocialError::NotFound(existing.id.as_str().to_string()))?);
        }

        let connection = Connection::pending(platform).activated(
            identity.external_account_id,
            &identity.display_name,
            access_token,
            grant.expires_at,
        );
        self.store.insert_connection(connection.clone())?;
        info!(
            "Connected {platform} account {} ({})",
            connection.external_account_id, identity.display_name
        );
        Ok(connection)
    }

    /// A token guaranteed usable for roughly the next minute.
    ///
    /// Refreshes the stored token when it is expired or inside the skew
    /// window. Concurrent callers for the same connection serialize on a
    /// per-connection lock and the winner's refresh serves everybody.
    pub fn get_valid_token(&self, connection_id: &ConnectionId) -> Result<String, SocialError> {
        let connection = self.load_connection(connection_id)?;
        if connection.status != ConnectionStatus::Active {
            return Err(SocialError::CredentialExpired);
        }
        if !connection.is_token_expired(TOKEN_EXPIRY_SKEW_SECS) {
            return Ok(connection.access_token);
        }

        let lock = self.refresh_lock(connection_id);
        let _guard = lock.lock().unwrap();

        // Another caller may have refreshed while we waited
        let connection = self.load_connection(connection_id)?;
        if connection.status != ConnectionStatus::Active {
            return Err(SocialError::CredentialExpired);
        }
        if !connection.is_token_expired(TOKEN_EXPIRY_SKEW_SECS) {
            return Ok(connection.access_token);
        }

        let client = self.platforms.get(connection.platform)?;
        match client.refresh_token(&connection.access_token) {
            Ok(grant) => {
                self.store.update_connection_token(
                    connection_id,
                    &grant.access_token,
                    grant.expires_at,
                )?;
                info!(
                    "Refreshed token for connection {}",
                    connection_id.as_str()
                );
                Ok(grant.access_token)
            }
            Err(e) => {
                warn!(
                    "Token refresh failed for connection {}: {e}",
                    connection_id.as_str()
                );
                self.store
                    .update_connection_status(connection_id, ConnectionStatus::Expired)?;
                Err(SocialError::CredentialExpired)
            }
        }
    }

    /// Disconnect a connection.
    ///
    /// The local status flips to `Revoked` unconditionally; asking the
    /// platform to invalidate the token is best effort.
    pub fn disconnect(&self, connection_id: &ConnectionId) -> Result<(), SocialError> {
        let connection = self.load_connection(connection_id)?;
        self.store
            .update_connection_status(connection_id, ConnectionStatus::Revoked)?;
        info!("Disconnected connection {}", connection_id.as_str());

        if let Ok(client) = self.platforms.get(connection.platform)
            && let Err(e) = client.revoke_token(&connection.access_token)
        {
            warn!(
                "Platform revocation failed for connection {}: {e}",
                connection_id.as_str()
            );
        }
        Ok(())
    }

    fn load_connection(&self, id: &ConnectionId) -> Result<Connection, SocialError> {
        self.store
            .get_connection(id)?
            .ok_or_else(|| SocialError::NotFound(format!("connection {}", id.as_str())))
    }

    fn refresh_lock(&self, id: &ConnectionId) -> Arc<Mutex<()>> {
        let mut locks = self.refresh_locks.lock().unwrap();
        locks
            .entry(id.as_str().to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::DemoPlatform;
    use crate::store::InMemorySocialStore;

    fn setup() -> (Arc<InMemorySocialStore>, Arc<DemoPlatform>, ConnectionManager) {
        let store = Arc::new(InMemorySocialStore::new());
        let demo = Arc::new(DemoPlatform::new());
        let mut registry = PlatformRegistry::new();
        registry.register(demo.clone());
        let manager = ConnectionManager::new(
            store.clone(),
            Arc::new(registry),
            "http://localhost:8787/oauth/callback",
        );
        (store, demo, manager)
    }

    fn connect(manager: &ConnectionManager) -> Connection {
        let start = manager.begin_authorization(Platform::Demo).unwrap();
        manager.complete_authorization(&start.state, "code").unwrap()
    }

    #[test]
    fn test_authorization_flow() {
        let (store, _demo, manager) = setup();
        let start = manager.begin_authorization(Platform::Demo).unwrap();
        assert!(start.authorize_url.contains(&start.state));

        let connection = manager.complete_authorization(&start.state, "code").unwrap();
        assert_eq!(connection.status, ConnectionStatus::Active);
        assert_eq!(connection.external_account_id, DemoPlatform::ACCOUNT_ID);
        assert_eq!(store.list_connections().unwrap().len(), 1);
    }

    #[test]
    fn test_state_is_single_use() {
        let (_store, _demo, manager) = setup();
        let start = manager.begin_authorization(Platform::Demo).unwrap();
        manager.complete_authorization(&start.state, "code").unwrap();

        let err = manager
            .complete_authorization(&start.state, "code")
            .unwrap_err();
        assert!(matches!(err, SocialError::InvalidState));
    }

    #[test]
    fn test_unknown_state_rejected() {
        let (_store, _demo, manager) = setup();
        assert!(matches!(
            manager.complete_authorization("never-issued", "code"),
            Err(SocialError::InvalidState)
        ));
    }

    #[test]
    fn test_reauthorization_reuses_connection() {
        let (store, _demo, manager) = setup();
        let first = connect(&manager);
        let second = connect(&manager);

        assert_eq!(first.id, second.id);
        assert_ne!(first.access_token, second.access_token);
        assert_eq!(store.list_connections().unwrap().len(), 1);
    }

    #[test]
    fn test_token_refresh_when_expired() {
        let (store, demo, manager) = setup();
        demo.set_token_ttl_secs(1);
        let connection = connect(&manager);
        let stale = connection.access_token.clone();

        // TTL of 1s falls inside the skew window, so the next call refreshes
        let fresh = manager.get_valid_token(&connection.id).unwrap();
        assert_ne!(fresh, stale);
        assert_eq!(demo.refresh_calls(), 1);

        let stored = store.get_connection(&connection.id).unwrap().unwrap();
        assert_eq!(stored.access_token, fresh);
    }

    #[test]
    fn test_refresh_failure_expires_connection() {
        let (store, demo, manager) = setup();
        demo.set_token_ttl_secs(1);
        let connection = connect(&manager);
        demo.set_fail_refresh(true);

        let err = manager.get_valid_token(&connection.id).unwrap_err();
        assert!(matches!(err, SocialError::CredentialExpired));
        let stored = store.get_connection(&connection.id).unwrap().unwrap();
        assert_eq!(stored.status, ConnectionStatus::Expired);

        // And stays terminal until re-authorization
        assert!(matches!(
            manager.get_valid_token(&connection.id),
            Err(SocialError::CredentialExpired)
        ));
    }

    #[test]
    fn test_disconnect_marks_revoked() {
        let (store, demo, manager) = setup();
        let connection = connect(&manager);

        manager.disconnect(&connection.id).unwrap();
        let stored = store.get_connection(&connection.id).unwrap().unwrap();
        assert_eq!(stored.status, ConnectionStatus::Revoked);
        assert_eq!(demo.revoke_calls(), 1);

        // A revoked connection no longer yields tokens
        assert!(matches!(
            manager.get_valid_token(&connection.id),
            Err(SocialError::CredentialExpired)
        ));
    }

    #[test]
    fn test_concurrent_refresh_single_flight() {
        let (_store, demo, manager) = setup();
        demo.set_token_ttl_secs(1);
        let connection = connect(&manager);
        demo.set_refresh_delay(Some(std::time::Duration::from_millis(50)));

        let manager = Arc::new(manager);
        let mut handles = Vec::new();
        for _ in 0..4 {
            let manager = manager.clone();
            let id = connection.id.clone();
            handles.push(std::thread::spawn(move || manager.get_valid_token(&id)));
        }
        let tokens: Vec<String> = handles
            .into_iter()
            .map(|h| h.join().unwrap().unwrap())
            .collect();

        assert_eq!(demo.refresh_calls(), 1);
        assert!(tokens.windows(2).all(|w| w[0] == w[1]));
    }
}
