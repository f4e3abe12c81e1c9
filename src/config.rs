//! Configuration management for the swing watch-list tracker

use crate::services::exit_alerts::{DismissalPolicy, ExitThresholds};
use crate::services::poller::PollGate;
use anyhow::Result;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::env;
use std::str::FromStr;

/// Tracker configuration loaded from environment
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the scoring/portfolio backend
    pub backend_url: String,

    /// Path to SQLite database backing the persisted preferences and state
    pub database_path: String,

    /// Kite Connect API key, used when the backend cannot hand out a login URL
    pub kite_api_key: Option<String>,

    /// Redirect URI registered with Kite Connect
    pub kite_redirect_uri: Option<String>,

    /// Quantity recorded for newly tracked positions
    pub default_quantity: u32,

    /// Stop-loss distance under the entry close (0.03 = 3%)
    pub stop_loss_pct: Decimal,

    /// Undo optimistic portfolio changes when the backend rejects them
    pub rollback_on_failure: bool,

    /// What happens to a dismissal once its symbol evaluates clean
    pub dismissal_policy: DismissalPolicy,

    /// Whether scheduled polling waits for a live broker session
    pub poll_gate: PollGate,

    /// Refresh interval used until preferences are loaded
    pub default_refresh_interval_ms: u64,

    /// Exit rule thresholds
    pub exit_thresholds: ExitThresholds,

    /// Discord webhook URL for exit alerts (optional)
    pub discord_webhook_url: Option<String>,

    /// Port for the HTTP surface
    pub server_port: u16,

    /// Path the login callback redirects back to
    pub default_view: String,

    /// HTTP client timeout in seconds
    pub http_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_url: "http://localhost:8000".to_string(),
            database_path: "swing_watch.db".to_string(),
            kite_api_key: None,
            kite_redirect_uri: None,
            default_quantity: 100,
            stop_loss_pct: dec!(0.03),
            rollback_on_failure: true,
            dismissal_policy: DismissalPolicy::Permanent,
            poll_gate: PollGate::SessionLoggedIn,
            default_refresh_interval_ms: 60_000,
            exit_thresholds: ExitThresholds::default(),
            discord_webhook_url: None,
            server_port: 3030,
            default_view: "/".to_string(),
            http_timeout_secs: 30,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        let defaults = Self::default();

        let backend_url = env::var("BACKEND_URL")
            .map(|v| v.trim_end_matches('/').to_string())
            .unwrap_or(defaults.backend_url);

        let database_path = env::var("DATABASE_PATH").unwrap_or(defaults.database_path);

        let kite_api_key = env::var("KITE_API_KEY").ok().filter(|s| !s.is_empty());
        let kite_redirect_uri = env::var("KITE_REDIRECT_URI").ok().filter(|s| !s.is_empty());

        let default_quantity = env::var("DEFAULT_QUANTITY")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.default_quantity);

        let stop_loss_pct = env::var("STOP_LOSS_PERCENT")
            .ok()
            .and_then(|v| Decimal::from_str(&v).ok())
            .unwrap_or(defaults.stop_loss_pct);

        let rollback_on_failure = env::var("ROLLBACK_ON_FAILURE")
            .map(|v| v.to_lowercase() != "false")
            .unwrap_or(defaults.rollback_on_failure);

        let dismissal_policy = match env::var("DISMISSAL_POLICY") {
            Ok(v) => DismissalPolicy::from_str(&v).map_err(anyhow::Error::msg)?,
            Err(_) => defaults.dismissal_policy,
        };

        let poll_gate = match env::var("POLL_GATE") {
            Ok(v) => PollGate::from_str(&v).map_err(anyhow::Error::msg)?,
            Err(_) => defaults.poll_gate,
        };

        let default_refresh_interval_ms = env::var("REFRESH_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.default_refresh_interval_ms);

        let discord_webhook_url = env::var("DISCORD_WEBHOOK_URL").ok().filter(|s| !s.is_empty());

        let server_port = env::var("SERVER_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.server_port);

        let http_timeout_secs = env::var("HTTP_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.http_timeout_secs);

        // Validate configuration
        if stop_loss_pct <= Decimal::ZERO || stop_loss_pct >= Decimal::ONE {
            anyhow::bail!("STOP_LOSS_PERCENT must be between 0 and 1, got {}", stop_loss_pct);
        }
        if default_quantity == 0 {
            anyhow::bail!("DEFAULT_QUANTITY must be positive");
        }
        if default_refresh_interval_ms == 0 {
            anyhow::bail!("REFRESH_INTERVAL_MS must be positive");
        }

        Ok(Self {
            backend_url,
            database_path,
            kite_api_key,
            kite_redirect_uri,
            default_quantity,
            stop_loss_pct,
            rollback_on_failure,
            dismissal_policy,
            poll_gate,
            default_refresh_interval_ms,
            exit_thresholds: defaults.exit_thresholds,
            discord_webhook_url,
            server_port,
            default_view: defaults.default_view,
            http_timeout_secs,
        })
    }
}

/// Kite Connect login endpoint
pub struct KiteLogin;

impl KiteLogin {
    pub const BASE_URL: &'static str = "https://kite.zerodha.com/connect/login";

    /// Login URL built from the published OAuth template
    pub fn url(api_key: &str, redirect_uri: Option<&str>) -> String {
        let mut url = format!("{}?api_key={}&v=3", Self::BASE_URL, urlencoding::encode(api_key));
        if let Some(redirect) = redirect_uri {
            url.push_str("&redirect_uri=");
            url.push_str(&urlencoding::encode(redirect));
        }
        url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_template() {
        assert_eq!(
            KiteLogin::url("abc123", None),
            "https://kite.zerodha.com/connect/login?api_key=abc123&v=3"
        );
        assert_eq!(
            KiteLogin::url("abc123", Some("http://localhost:3030/kite-callback")),
            "https://kite.zerodha.com/connect/login?api_key=abc123&v=3&redirect_uri=http%3A%2F%2Flocalhost%3A3030%2Fkite-callback"
        );
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.default_quantity, 100);
        assert_eq!(config.stop_loss_pct, dec!(0.03));
        assert!(config.rollback_on_failure);
        assert_eq!(config.poll_gate, PollGate::SessionLoggedIn);
    }
}
