//! Connection model representing an authorized link to an external account

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Unique local identifier for a connection
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh local identifier
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Supported external messaging platforms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Facebook page-level Messenger integration
    Facebook,
    /// In-process scripted platform for development and tests
    Demo,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Facebook => "facebook",
            Platform::Demo => "demo",
        }
    }

    /// Parse a platform name as used in URLs and storage
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "facebook" => Some(Platform::Facebook),
            "demo" => Some(Platform::Demo),
            _ => None,
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// Authorization started but not completed
    Pending,
    /// Token exchange succeeded; connection is usable for sync
    Active,
    /// Token rejected or past its expiry and refresh failed
    Expired,
    /// Explicitly disconnected by the user
    Revoked,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Pending => "pending",
            ConnectionStatus::Active => "active",
            ConnectionStatus::Expired => "expired",
            ConnectionStatus::Revoked => "revoked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ConnectionStatus::Pending),
            "active" => Some(ConnectionStatus::Active),
            "expired" => Some(ConnectionStatus::Expired),
            "revoked" => Some(ConnectionStatus::Revoked),
            _ => None,
        }
    }
}

/// One authorized binding to an external account or page
///
/// At most one `Active` connection may exist per
/// (`platform`, `external_account_id`) pair. Revoked and expired
/// connections are never reused; re-authorization creates a fresh row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    /// Local identifier, stable across token refreshes
    pub id: ConnectionId,
    pub platform: Platform,
    /// Platform-native account/page identifier
    pub external_account_id: String,
    pub display_name: String,
    pub access_token: String,
    /// None for platforms that issue non-expiring tokens
    pub token_expires_at: Option<DateTime<Utc>>,
    pub status: ConnectionStatus,
    pub created_at: DateTime<Utc>,
}

impl Connection {
    /// Create a connection in `Pending` state at the start of authorization
    pub fn pending(platform: Platform) -> Self {
        Self {
            id: ConnectionId::generate(),
            platform,
            external_account_id: String::new(),
            display_name: String::new(),
            access_token: String::new(),
            token_expires_at: None,
            status: ConnectionStatus::Pending,
            created_at: Utc::now(),
        }
    }

    /// Promote to `Active` after a successful token exchange
    pub fn activated(
        mut self,
        external_account_id: impl Into<String>,
        display_name: impl Into<String>,
        access_token: impl Into<String>,
        token_expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        self.external_account_id = external_account_id.into();
        self.display_name = display_name.into();
        self.access_token = access_token.into();
        self.token_expires_at = token_expires_at;
        self.status = ConnectionStatus::Active;
        self
    }

    /// Whether the stored token is past (or within `skew_secs` of) expiry.
    ///
    /// Connections without an expiry never report as expired here.
    pub fn is_token_expired(&self, skew_secs: i64) -> bool {
        match self.token_expires_at {
            Some(expires_at) => expires_at <= Utc::now() + Duration::seconds(skew_secs),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_roundtrip() {
        assert_eq!(Platform::parse("facebook"), Some(Platform::Facebook));
        assert_eq!(Platform::parse("demo"), Some(Platform::Demo));
        assert_eq!(Platform::parse("myspace"), None);
        assert_eq!(Platform::Facebook.as_str(), "facebook");
    }

    #[test]
    fn test_status_roundtrip() {
        for status in [
            ConnectionStatus::Pending,
            ConnectionStatus::Active,
            ConnectionStatus::Expired,
            ConnectionStatus::Revoked,
        ] {
            assert_eq!(ConnectionStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn test_lifecycle_pending_to_active() {
        let conn = Connection::pending(Platform::Demo);
        assert_eq!(conn.status, ConnectionStatus::Pending);

        let conn = conn.activated("acct-1", "Demo Account", "tok-1", None);
        assert_eq!(conn.status, ConnectionStatus::Active);
        assert_eq!(conn.external_account_id, "acct-1");
        assert_eq!(conn.access_token, "tok-1");
    }

    #[test]
    fn test_token_expiry() {
        let mut conn =
            Connection::pending(Platform::Demo).activated("acct-1", "Demo", "tok", None);
        assert!(!conn.is_token_expired(60));

        conn.token_expires_at = Some(Utc::now() + Duration::hours(1));
        assert!(!conn.is_token_expired(60));

        conn.token_expires_at = Some(Utc::now() - Duration::seconds(1));
        assert!(conn.is_token_expired(60));

        // Within the skew window counts as expired
        conn.token_expires_at = Some(Utc::now() + Duration::seconds(30));
        assert!(conn.is_token_expired(60));
    }
}
