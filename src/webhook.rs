//! Discord webhook notifications for exit alerts

use crate::services::exit_alerts::ExitAlert;
use crate::services::notifier::{Notifier, NotifyError};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::info;

/// Discord webhook client for sending exit alerts
#[derive(Clone)]
pub struct DiscordWebhook {
    client: Client,
    webhook_url: String,
}

impl DiscordWebhook {
    /// Create a new Discord webhook client
    pub fn new(webhook_url: String) -> Self {
        Self {
            client: Client::new(),
            webhook_url,
        }
    }

    /// Build the embed payload for an exit alert
    pub fn embed(alert: &ExitAlert) -> serde_json::Value {
        let reasons = alert
            .reasons
            .iter()
            .map(|r| format!("• {}", r.describe()))
            .collect::<Vec<_>>()
            .join("\n");

        json!({
            "embeds": [{
                "title": format!("⚠️ Exit signal: {}", alert.symbol),
                "description": reasons,
                "color": 0xFF8C00,  // Orange
                "fields": [
                    {
                        "name": "Close",
                        "value": alert.close.map(|c| format!("₹{}", c)).unwrap_or_else(|| "-".to_string()),
                        "inline": true
                    },
                    {
                        "name": "Stop Loss",
                        "value": format!("₹{}", alert.stop_loss),
                        "inline": true
                    }
                ],
                "footer": {
                    "text": "Swing Watch"
                },
                "timestamp": alert.raised_at.to_rfc3339()
            }]
        })
    }
}

#[async_trait]
impl Notifier for DiscordWebhook {
    async fn notify(&self, alert: &ExitAlert) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.webhook_url)
            .json(&Self::embed(alert))
            .send()
            .await
            .map_err(|e| NotifyError::Delivery(e.to_string()))?;

        if !response.status().is_success() {
            return Err(NotifyError::Delivery(format!("Discord webhook failed: {}", response.status())));
        }

        info!("Discord alert sent for: {}", alert.symbol);
        Ok(())
    }

    fn name(&self) -> &str {
        "discord"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::exit_alerts::ExitReason;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn alert() -> ExitAlert {
        ExitAlert {
            symbol: "SBIN".to_string(),
            close: Some(dec!(600)),
            stop_loss: dec!(582),
            reasons: vec![ExitReason::RsiOverbought { rsi: 81.0, ceiling: 75.0 }],
            raised_at: Utc::now(),
        }
    }

    #[test]
    fn test_embed_lists_reasons() {
        let embed = DiscordWebhook::embed(&alert());
        let description = embed["embeds"][0]["description"].as_str().unwrap();
        assert!(description.contains("RSI 81.0 above 75"));
        assert_eq!(embed["embeds"][0]["fields"][1]["value"], "₹582");
    }

    #[tokio::test]
    async fn test_webhook_failure_is_reported() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&mock_server)
            .await;

        let webhook = DiscordWebhook::new(format!("{}/hook", mock_server.uri()));
        assert!(webhook.notify(&alert()).await.is_err());
    }
}
