//! Configuration loading for platform integrations
//!
//! Supports loading OAuth app credentials from (in order of priority):
//! 1. Compile-time embedded credentials (for production builds)
//! 2. JSON file (~/.config/hermes/platforms.json)
//! 3. Runtime environment variables (fallback)

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::models::Platform;

/// Platform config filename in the Hermes config directory
const PLATFORMS_FILE: &str = "platforms.json";

/// OAuth app credentials for one external platform
#[derive(Debug, Clone, Deserialize)]
pub struct PlatformCredentials {
    pub client_id: String,
    pub client_secret: String,
    /// Secret used to sign webhook payloads (HMAC-SHA256)
    #[serde(default)]
    pub app_secret: Option<String>,
    /// Token echoed back during the webhook subscription handshake
    #[serde(default)]
    pub verify_token: Option<String>,
}

/// Top-level service configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SocialConfig {
    /// OAuth redirect URI registered with the platforms
    pub redirect_uri: String,
    #[serde(default)]
    pub facebook: Option<PlatformCredentials>,
    /// URL POSTed to on unrecoverable sync failures (fire-and-forget)
    #[serde(default)]
    pub alert_webhook_url: Option<String>,
    /// Seconds between background polls per connection
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Address the HTTP server binds to
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Where the browser is sent after the OAuth redirect completes
    #[serde(default = "default_ui_url")]
    pub ui_return_url: String,
}

fn default_poll_interval() -> u64 {
    120
}

fn default_bind_addr() -> String {
    "127.0.0.1:8787".to_string()
}

fn default_ui_url() -> String {
    "/".to_string()
}

impl SocialConfig {
    /// Load configuration using the following priority:
    /// 1. JSON file (~/.config/hermes/platforms.json)
    /// 2. Runtime environment variables
    pub fn load() -> Result<Self> {
        if config::config_exists(PLATFORMS_FILE) {
            let mut cfg: SocialConfig = config::load_json(PLATFORMS_FILE)?;
            if cfg.facebook.is_none() {
                cfg.facebook = PlatformCredentials::facebook_fallback();
            }
            return Ok(cfg);
        }
        Self::from_env()
    }

    /// Parse configuration from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse platform config JSON")
    }

    /// Build configuration from environment variables alone
    pub fn from_env() -> Result<Self> {
        let redirect_uri = std::env::var("HERMES_REDIRECT_URI")
            .context("HERMES_REDIRECT_URI environment variable not set")?;

        Ok(Self {
            redirect_uri,
            facebook: PlatformCredentials::facebook_fallback(),
            alert_webhook_url: std::env::var("HERMES_ALERT_WEBHOOK_URL").ok(),
            poll_interval_secs: std::env::var("HERMES_POLL_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_poll_interval),
            bind_addr: std::env::var("HERMES_BIND_ADDR").unwrap_or_else(|_| default_bind_addr()),
            ui_return_url: std::env::var("HERMES_UI_URL").unwrap_or_else(|_| default_ui_url()),
        })
    }

    /// Credentials for a platform, if configured
    pub fn credentials(&self, platform: Platform) -> Option<&PlatformCredentials> {
        match platform {
            Platform::Facebook => self.facebook.as_ref(),
            Platform::Demo => None,
        }
    }
}

impl PlatformCredentials {
    /// Facebook credentials embedded at compile time or from env vars.
    /// Build with: FACEBOOK_CLIENT_ID=xxx FACEBOOK_CLIENT_SECRET=yyy cargo build --release
    fn facebook_fallback() -> Option<Self> {
        if let Some(creds) = Self::facebook_compile_time() {
            return Some(creds);
        }
        let client_id = std::env::var("FACEBOOK_CLIENT_ID").ok()?;
        let client_secret = std::env::var("FACEBOOK_CLIENT_SECRET").ok()?;
        Some(Self {
            client_id,
            client_secret,
            app_secret: std::env::var("FACEBOOK_APP_SECRET").ok(),
            verify_token: std::env::var("FACEBOOK_VERIFY_TOKEN").ok(),
        })
    }

    fn facebook_compile_time() -> Option<Self> {
        let client_id = option_env!("FACEBOOK_CLIENT_ID")?;
        let client_secret = option_env!("FACEBOOK_CLIENT_SECRET")?;
        if client_id.is_empty() || client_secret.is_empty() {
            return None;
        }
        Some(Self {
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            app_secret: option_env!("FACEBOOK_APP_SECRET").map(str::to_string),
            verify_token: option_env!("FACEBOOK_VERIFY_TOKEN").map(str::to_string),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let json = r#"{
            "redirect_uri": "https://clinic.example.com/oauth/callback",
            "facebook": {
                "client_id": "fb-app-id",
                "client_secret": "fb-app-secret",
                "app_secret": "fb-webhook-secret",
                "verify_token": "subscribe-me"
            },
            "alert_webhook_url": "https://alerts.example.com/hook",
            "poll_interval_secs": 60
        }"#;

        let cfg = SocialConfig::from_json(json).unwrap();
        assert_eq!(cfg.redirect_uri, "https://clinic.example.com/oauth/callback");
        assert_eq!(cfg.poll_interval_secs, 60);
        let fb = cfg.credentials(Platform::Facebook).unwrap();
        assert_eq!(fb.client_id, "fb-app-id");
        assert_eq!(fb.app_secret.as_deref(), Some("fb-webhook-secret"));
    }

    #[test]
    fn test_parse_minimal_config() {
        let json = r#"{ "redirect_uri": "http://localhost:8787/oauth/callback" }"#;
        let cfg = SocialConfig::from_json(json).unwrap();
        assert_eq!(cfg.poll_interval_secs, 120);
        assert!(cfg.alert_webhook_url.is_none());
    }

    #[test]
    fn test_invalid_config() {
        assert!(SocialConfig::from_json(r#"{ "other": 1 }"#).is_err());
    }
}
