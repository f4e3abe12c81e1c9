//! Exit-alert engine
//!
//! Recomputes the alert set from scratch on every evaluation. Dismissed
//! symbols are excluded; notifications fire only for symbols entering the
//! set, and each send runs as its own detached task.

use super::ledger::DismissalLedger;
use super::rules::{ExitReason, ExitThresholds};
use crate::services::notifier::Notifier;
use crate::types::{IndicatorSnapshot, Position, Suggestion};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

/// What happens to a dismissal when its symbol evaluates clean again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DismissalPolicy {
    /// Suppressed until explicitly cleared or untracked
    #[default]
    Permanent,
    /// Cleared as soon as no rule holds for the symbol
    ResetOnResolve,
}

impl FromStr for DismissalPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "permanent" => Ok(DismissalPolicy::Permanent),
            "reset_on_resolve" | "reset-on-resolve" => Ok(DismissalPolicy::ResetOnResolve),
            other => Err(format!("unknown dismissal policy '{}'", other)),
        }
    }
}

/// A tracked position paired with its latest indicator readings
#[derive(Debug, Clone)]
pub struct EnrichedPosition {
    pub position: Position,
    pub indicators: IndicatorSnapshot,
}

/// Pair each position with the matching suggestion's indicators.
/// Positions missing from the suggestion set are left out.
pub fn enrich(positions: &[Position], suggestions: &[Suggestion]) -> Vec<EnrichedPosition> {
    let by_symbol: HashMap<&str, &Suggestion> =
        suggestions.iter().map(|s| (s.symbol.as_str(), s)).collect();

    positions
        .iter()
        .filter_map(|position| match by_symbol.get(position.symbol.as_str()) {
            Some(s) => Some(EnrichedPosition {
                position: position.clone(),
                indicators: s.indicators,
            }),
            None => {
                debug!("No indicator snapshot for {} this cycle", position.symbol);
                None
            }
        })
        .collect()
}

/// A position that needs exit attention
#[derive(Debug, Clone, Serialize)]
pub struct ExitAlert {
    pub symbol: String,
    pub close: Option<Decimal>,
    pub stop_loss: Decimal,
    pub reasons: Vec<ExitReason>,
    pub raised_at: DateTime<Utc>,
}

pub struct ExitAlertEngine {
    thresholds: ExitThresholds,
    policy: DismissalPolicy,
    ledger: Arc<DismissalLedger>,
    notifiers: Vec<Arc<dyn Notifier>>,
    notifications_enabled: AtomicBool,
    /// Symbols in the previous evaluation's result. Held for the whole of
    /// an evaluation, so dismissals never interleave with one.
    active: Mutex<HashSet<String>>,
    alerts_tx: watch::Sender<Arc<Vec<ExitAlert>>>,
}

impl ExitAlertEngine {
    pub fn new(
        thresholds: ExitThresholds,
        policy: DismissalPolicy,
        ledger: Arc<DismissalLedger>,
        notifiers: Vec<Arc<dyn Notifier>>,
    ) -> Self {
        let (alerts_tx, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            thresholds,
            policy,
            ledger,
            notifiers,
            notifications_enabled: AtomicBool::new(true),
            active: Mutex::new(HashSet::new()),
            alerts_tx,
        }
    }

    pub fn ledger(&self) -> &Arc<DismissalLedger> {
        &self.ledger
    }

    pub fn set_notifications_enabled(&self, enabled: bool) {
        self.notifications_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn notifications_enabled(&self) -> bool {
        self.notifications_enabled.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Vec<ExitAlert>>> {
        self.alerts_tx.subscribe()
    }

    /// Alert set from the latest evaluation
    pub fn current(&self) -> Arc<Vec<ExitAlert>> {
        self.alerts_tx.borrow().clone()
    }

    /// Evaluate every position and return those needing exit attention
    pub async fn evaluate(&self, portfolio: &[EnrichedPosition]) -> Vec<ExitAlert> {
        let mut active = self.active.lock().await;
        let dismissed = self.ledger.snapshot().await;
        let mut alerts = Vec::new();

        for entry in portfolio {
            let symbol = &entry.position.symbol;
            let reasons = self.thresholds.reasons(&entry.indicators, entry.position.stop_loss);

            if dismissed.contains(symbol) {
                if reasons.is_empty() && self.policy == DismissalPolicy::ResetOnResolve {
                    self.ledger.clear(symbol).await;
                }
                continue;
            }

            if reasons.is_empty() {
                continue;
            }

            alerts.push(ExitAlert {
                symbol: symbol.clone(),
                close: Decimal::try_from(entry.indicators.close).ok().map(|c| c.round_dp(2)),
                stop_loss: entry.position.stop_loss,
                reasons,
                raised_at: Utc::now(),
            });
        }

        let entering: Vec<ExitAlert> = alerts
            .iter()
            .filter(|a| !active.contains(&a.symbol))
            .cloned()
            .collect();
        *active = alerts.iter().map(|a| a.symbol.clone()).collect();

        if !entering.is_empty() {
            if self.notifications_enabled() {
                for alert in &entering {
                    info!(
                        "Exit alert for {}: {}",
                        alert.symbol,
                        alert.reasons.iter().map(|r| r.describe()).collect::<Vec<_>>().join(", ")
                    );
                    self.dispatch(alert);
                }
            } else {
                debug!("{} new exit alerts, notifications disabled", entering.len());
            }
        }

        self.alerts_tx.send_replace(Arc::new(alerts.clone()));
        drop(active);
        alerts
    }

    /// Fire-and-forget delivery on every channel
    fn dispatch(&self, alert: &ExitAlert) {
        for notifier in &self.notifiers {
            let notifier = notifier.clone();
            let alert = alert.clone();
            tokio::spawn(async move {
                match notifier.notify(&alert).await {
                    Ok(()) => debug!("{} notification sent for {}", notifier.name(), alert.symbol),
                    Err(e) => warn!("{} notification for {} failed: {}", notifier.name(), alert.symbol, e),
                }
            });
        }
    }

    /// Acknowledge a symbol's alert; it is dropped from the current set at once
    pub async fn dismiss(&self, symbol: &str) -> bool {
        let mut active = self.active.lock().await;
        let added = self.ledger.dismiss(symbol).await;
        self.drop_from_current(&mut active, symbol);
        added
    }

    /// Lift a dismissal; the symbol alerts again on the next evaluation
    pub async fn clear_dismissal(&self, symbol: &str) -> bool {
        let _active = self.active.lock().await;
        self.ledger.clear(symbol).await
    }

    /// Drop all alert state for an untracked symbol
    pub async fn forget(&self, symbol: &str) {
        let mut active = self.active.lock().await;
        self.ledger.clear(symbol).await;
        self.drop_from_current(&mut active, symbol);
    }

    fn drop_from_current(&self, active: &mut HashSet<String>, symbol: &str) {
        active.remove(symbol);
        self.alerts_tx.send_if_modified(|alerts| {
            if !alerts.iter().any(|a| a.symbol == symbol) {
                return false;
            }
            *alerts = Arc::new(alerts.iter().filter(|a| a.symbol != symbol).cloned().collect());
            true
        });
    }
}
