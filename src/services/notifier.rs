//! Notification port for exit alerts
//!
//! Delivery is best-effort: the alert engine spawns each send as its own
//! task and only logs failures.

use crate::client::{price_to_f64, Backend};
use crate::services::exit_alerts::ExitAlert;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("delivery failed: {0}")]
    Delivery(String),
}

/// A channel exit alerts can be sent through
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, alert: &ExitAlert) -> Result<(), NotifyError>;
    fn name(&self) -> &str;
}

/// Asks the backend to send the exit email (`POST /api/send-exit-email`)
pub struct EmailAlertNotifier {
    backend: Arc<dyn Backend>,
}

impl EmailAlertNotifier {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Notifier for EmailAlertNotifier {
    async fn notify(&self, alert: &ExitAlert) -> Result<(), NotifyError> {
        let price = alert.close.map(price_to_f64);
        self.backend
            .send_exit_email(&alert.symbol, price)
            .await
            .map_err(|e| NotifyError::Delivery(e.to_string()))
    }

    fn name(&self) -> &str {
        "email"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ApiError;
    use crate::services::exit_alerts::ExitReason;
    use crate::testing::MockBackend;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn alert() -> ExitAlert {
        ExitAlert {
            symbol: "INFY".to_string(),
            close: Some(dec!(1450.5)),
            stop_loss: dec!(1455),
            reasons: vec![ExitReason::StopLossHit {
                close: dec!(1450.5),
                stop_loss: dec!(1455),
            }],
            raised_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_email_notifier_calls_backend() {
        let backend = Arc::new(MockBackend::new());
        let notifier = EmailAlertNotifier::new(backend.clone());

        notifier.notify(&alert()).await.unwrap();
        assert_eq!(backend.call_args("send_exit_email").await, vec!["INFY".to_string()]);
    }

    #[tokio::test]
    async fn test_email_notifier_reports_failure() {
        let backend = Arc::new(MockBackend::new());
        backend
            .fail_next(
                "send_exit_email",
                ApiError::Rejected {
                    status: 500,
                    body: "Email send failure".to_string(),
                },
            )
            .await;
        let notifier = EmailAlertNotifier::new(backend);

        assert!(matches!(notifier.notify(&alert()).await, Err(NotifyError::Delivery(_))));
    }
}
