//! Composition root
//!
//! Wires the session, poller, portfolio, alert engine and preferences
//! together and runs the monitor task that re-evaluates exit alerts every
//! time the suggestion set or the portfolio changes.

use crate::client::{Backend, BackendClient};
use crate::config::Config;
use crate::db::Database;
use crate::errors::ApiError;
use crate::services::exit_alerts::{enrich, DismissalLedger, ExitAlert, ExitAlertEngine};
use crate::services::notifier::{EmailAlertNotifier, Notifier};
use crate::services::persistence::Persistence;
use crate::services::poller::{SuggestionPoller, TickOutcome};
use crate::services::portfolio::{PortfolioSettings, PortfolioStore, TrackOutcome};
use crate::services::preferences::{PreferenceStore, Preferences, PreferencesUpdate};
use crate::services::session::{LoginSettings, SessionManager, SessionStatus};
use crate::services::stock_checker::StockChecker;
use crate::types::{Position, SessionState, Suggestion};
use crate::webhook::DiscordWebhook;
use anyhow::Result;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A tracked position with its latest market view
#[derive(Debug, Clone, Serialize)]
pub struct PositionView {
    #[serde(flatten)]
    pub position: Position,
    pub current_price: Option<Decimal>,
    pub pnl_percent: Option<Decimal>,
    pub alert: bool,
    pub dismissed: bool,
}

/// Everything the UI renders
#[derive(Debug, Clone, Serialize)]
pub struct DashboardSnapshot {
    pub session: SessionState,
    pub status: SessionStatus,
    pub preferences: Preferences,
    pub suggestions: Vec<Suggestion>,
    pub portfolio: Vec<PositionView>,
    pub alerts: Vec<ExitAlert>,
    pub last_error: Option<String>,
    pub last_updated: Option<DateTime<Utc>>,
}

pub struct Dashboard {
    pub config: Arc<Config>,
    pub session: Arc<SessionManager>,
    pub poller: Arc<SuggestionPoller>,
    pub portfolio: Arc<PortfolioStore>,
    pub alerts: Arc<ExitAlertEngine>,
    pub preferences: Arc<PreferenceStore>,
    pub checker: Arc<StockChecker>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl Dashboard {
    /// Build every component over the given ports
    pub fn build(
        config: Config,
        backend: Arc<dyn Backend>,
        persistence: Persistence,
        notifiers: Vec<Arc<dyn Notifier>>,
    ) -> Self {
        let session = Arc::new(SessionManager::new(
            backend.clone(),
            persistence.clone(),
            LoginSettings {
                api_key: config.kite_api_key.clone(),
                redirect_uri: config.kite_redirect_uri.clone(),
                default_view: config.default_view.clone(),
            },
        ));
        let poller = Arc::new(SuggestionPoller::new(
            backend.clone(),
            session.clone(),
            persistence.clone(),
            config.poll_gate,
        ));
        let portfolio = Arc::new(PortfolioStore::new(
            backend.clone(),
            session.clone(),
            persistence.clone(),
            PortfolioSettings {
                default_quantity: config.default_quantity,
                stop_loss_pct: config.stop_loss_pct,
                rollback_on_failure: config.rollback_on_failure,
            },
        ));
        let alerts = Arc::new(ExitAlertEngine::new(
            config.exit_thresholds,
            config.dismissal_policy,
            Arc::new(DismissalLedger::new(persistence.clone())),
            notifiers,
        ));
        let preferences = Arc::new(PreferenceStore::new(
            persistence,
            Preferences {
                refresh_interval_ms: config.default_refresh_interval_ms,
                ..Preferences::default()
            },
        ));
        let checker = Arc::new(StockChecker::new(backend, session.clone()));

        Self {
            config: Arc::new(config),
            session,
            poller,
            portfolio,
            alerts,
            preferences,
            checker,
            monitor: Mutex::new(None),
        }
    }

    /// Build over the SQLite store and the HTTP backend
    pub async fn from_config(config: Config) -> Result<Self> {
        let db = Database::new(&config.database_path).await?;
        let backend: Arc<dyn Backend> = Arc::new(BackendClient::new(&config));

        let mut notifiers: Vec<Arc<dyn Notifier>> = vec![Arc::new(EmailAlertNotifier::new(backend.clone()))];
        if let Some(url) = &config.discord_webhook_url {
            notifiers.push(Arc::new(DiscordWebhook::new(url.clone())));
        }

        Ok(Self::build(config, backend, Persistence::new(Arc::new(db)), notifiers))
    }

    /// Restore persisted state without touching the network
    pub async fn restore(&self) {
        self.session.restore().await;
        let prefs = self.preferences.load().await;
        self.alerts.set_notifications_enabled(prefs.auto_alert_enabled);
        self.apply_poll_params(&prefs).await;
        self.alerts.ledger().load().await;
        self.portfolio.load_cached().await;
        self.poller.restore_cached().await;
    }

    /// Restore state, check the session, reconcile, and start polling
    pub async fn start(&self) -> Result<()> {
        self.restore().await;

        let state = self.session.check_session().await;
        if state.logged_in {
            if let Err(e) = self.portfolio.reconcile().await {
                warn!("Initial portfolio reconcile failed: {}", e);
            }
        }
        self.evaluate().await;

        let monitor = tokio::spawn(run_monitor(
            self.session.clone(),
            self.portfolio.clone(),
            self.alerts.clone(),
            self.poller.subscribe(),
        ));
        if let Some(previous) = self.monitor.lock().await.replace(monitor) {
            previous.abort();
        }

        self.poller.start(self.preferences.get().poll_params()).await?;
        info!("Dashboard started");
        Ok(())
    }

    pub async fn shutdown(&self) {
        self.poller.stop().await;
        if let Some(monitor) = self.monitor.lock().await.take() {
            monitor.abort();
        }
        info!("Dashboard stopped");
    }

    /// Re-evaluate exit alerts against the current suggestion set
    pub async fn evaluate(&self) -> Vec<ExitAlert> {
        evaluate_cycle(&self.portfolio, &self.poller.suggestions(), &self.alerts).await
    }

    /// Track a symbol from the current suggestion set
    pub async fn track(&self, symbol: &str) -> Result<TrackOutcome, ApiError> {
        let wanted = symbol.trim().to_uppercase();
        let suggestions = self.poller.suggestions();
        let suggestion = suggestions
            .iter()
            .find(|s| s.symbol.eq_ignore_ascii_case(&wanted))
            .ok_or_else(|| ApiError::Validation(format!("{} is not in the current suggestions", wanted)))?;

        let outcome = self.portfolio.track(suggestion).await?;
        self.evaluate().await;
        Ok(outcome)
    }

    /// Track a symbol at an explicit entry price
    pub async fn track_at(&self, symbol: &str, price: Decimal) -> Result<TrackOutcome, ApiError> {
        let outcome = self.portfolio.track_at(symbol, price).await?;
        self.evaluate().await;
        Ok(outcome)
    }

    /// Untrack a symbol; its dismissal goes with it
    pub async fn untrack(&self, symbol: &str) -> Result<bool, ApiError> {
        let removed = self.portfolio.untrack(symbol).await?;
        self.alerts.forget(&symbol.trim().to_uppercase()).await;
        self.evaluate().await;
        Ok(removed)
    }

    pub async fn dismiss(&self, symbol: &str) -> bool {
        self.alerts.dismiss(&symbol.trim().to_uppercase()).await
    }

    pub async fn clear_dismissal(&self, symbol: &str) -> bool {
        let cleared = self.alerts.clear_dismissal(&symbol.trim().to_uppercase()).await;
        if cleared {
            self.evaluate().await;
        }
        cleared
    }

    /// Apply a preference change; polling restarts at most once
    pub async fn update_preferences(&self, update: PreferencesUpdate) -> Result<Preferences, ApiError> {
        let prefs = self.preferences.update(update).await?;
        self.alerts.set_notifications_enabled(prefs.auto_alert_enabled);
        if update.changes_polling() {
            self.apply_poll_params(&self.preferences.get()).await;
        }
        Ok(prefs)
    }

    async fn apply_poll_params(&self, prefs: &Preferences) {
        if let Err(e) = self.poller.update_params(prefs.poll_params()).await {
            warn!("Failed to apply poll settings: {}", e);
        }
    }

    /// User-initiated refresh
    pub async fn refresh(&self) -> TickOutcome {
        self.poller.refresh_now().await
    }

    pub async fn snapshot(&self) -> DashboardSnapshot {
        let suggestions = self.poller.suggestions();
        let alerts = self.alerts.current();
        let dismissed = self.alerts.ledger().snapshot().await;
        let closes: HashMap<&str, Decimal> = suggestions
            .iter()
            .filter_map(|s| s.close_price().map(|c| (s.symbol.as_str(), c)))
            .collect();

        let portfolio = self
            .portfolio
            .positions()
            .iter()
            .map(|position| {
                let current_price = closes.get(position.symbol.as_str()).copied();
                PositionView {
                    current_price,
                    pnl_percent: current_price.map(|p| position.pnl_percent(p)),
                    alert: alerts.iter().any(|a| a.symbol == position.symbol),
                    dismissed: dismissed.contains(&position.symbol),
                    position: position.clone(),
                }
            })
            .collect();

        DashboardSnapshot {
            session: self.session.state(),
            status: self.session.status(),
            preferences: self.preferences.get(),
            suggestions: suggestions.as_ref().clone(),
            portfolio,
            alerts: alerts.as_ref().clone(),
            last_error: self.poller.last_error().await.map(|e| e.user_message()),
            last_updated: self.poller.last_updated().await,
        }
    }
}

async fn evaluate_cycle(
    portfolio: &PortfolioStore,
    suggestions: &[Suggestion],
    alerts: &ExitAlertEngine,
) -> Vec<ExitAlert> {
    portfolio.observe_prices(suggestions).await;
    let enriched = enrich(&portfolio.positions(), suggestions);
    alerts.evaluate(&enriched).await
}

/// Re-evaluates on every new suggestion set and reconciles the portfolio
/// whenever the session comes back
async fn run_monitor(
    session: Arc<SessionManager>,
    portfolio: Arc<PortfolioStore>,
    alerts: Arc<ExitAlertEngine>,
    mut suggestions_rx: watch::Receiver<Arc<Vec<Suggestion>>>,
) {
    let mut session_rx = session.subscribe();
    let mut settled = *session_rx.borrow_and_update();
    suggestions_rx.borrow_and_update();

    loop {
        tokio::select! {
            changed = suggestions_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let suggestions = suggestions_rx.borrow_and_update().clone();
                let alerted = evaluate_cycle(&portfolio, &suggestions, &alerts).await;
                debug!("Evaluated {} suggestions, {} exit alerts", suggestions.len(), alerted.len());
            }
            changed = session_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = *session_rx.borrow_and_update();
                if status == SessionStatus::Checking {
                    continue;
                }
                let entered = status.is_logged_in() && !settled.is_logged_in();
                settled = status;
                if entered {
                    match portfolio.reconcile().await {
                        Ok(_) => {
                            let suggestions = suggestions_rx.borrow().clone();
                            evaluate_cycle(&portfolio, &suggestions, &alerts).await;
                        }
                        Err(e) => warn!("Portfolio reconcile after login failed: {}", e),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::BackendPosition;
    use crate::testing::{healthy, settle, suggestion, MockBackend, RecordingNotifier};
    use crate::types::IndexFilter;
    use rust_decimal_macros::dec;
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedReceiver;

    async fn dashboard(logged_in: bool) -> (Dashboard, Arc<MockBackend>, UnboundedReceiver<String>) {
        let backend = Arc::new(MockBackend::new());
        backend.set_logged_in(logged_in).await;
        backend
            .set_suggestions(
                IndexFilter::Nifty50,
                vec![
                    healthy("INFY", 1500.0),
                    suggestion("TCS", -0.5, 55.0, 0.5, 25.0, 100.0),
                ],
            )
            .await;
        let (notifier, rx) = RecordingNotifier::new();
        let dashboard = Dashboard::build(
            Config::default(),
            backend.clone(),
            Persistence::in_memory(),
            vec![Arc::new(notifier)],
        );
        (dashboard, backend, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_tracked_symbol_alerts_after_poll() {
        let (dashboard, backend, mut rx) = dashboard(true).await;
        dashboard.start().await.unwrap();
        settle().await;

        assert_eq!(backend.call_count("fetch_suggestions").await, 1);
        dashboard.track("TCS").await.unwrap();
        dashboard.track("INFY").await.unwrap();

        let snapshot = dashboard.snapshot().await;
        assert_eq!(snapshot.alerts.len(), 1);
        assert_eq!(snapshot.alerts[0].symbol, "TCS");
        assert!(snapshot.portfolio.iter().any(|p| p.position.symbol == "TCS" && p.alert));
        assert_eq!(
            tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap().as_deref(),
            Some("TCS")
        );

        dashboard.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_untrack_clears_dismissal() {
        let (dashboard, _backend, _rx) = dashboard(true).await;
        dashboard.start().await.unwrap();
        settle().await;

        dashboard.track("TCS").await.unwrap();
        assert!(dashboard.dismiss("TCS").await);
        assert!(dashboard.snapshot().await.alerts.is_empty());

        dashboard.untrack("TCS").await.unwrap();
        assert!(!dashboard.alerts.ledger().contains("TCS").await);
        dashboard.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_track_requires_current_suggestion() {
        let (dashboard, backend, _rx) = dashboard(true).await;
        dashboard.start().await.unwrap();
        settle().await;

        assert!(matches!(dashboard.track("HDFC").await, Err(ApiError::Validation(_))));
        assert_eq!(backend.call_count("add_position").await, 0);
        dashboard.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_filter_change_repolls_once() {
        let (dashboard, backend, _rx) = dashboard(true).await;
        dashboard.start().await.unwrap();
        settle().await;

        dashboard
            .update_preferences(PreferencesUpdate {
                index_filter: Some(IndexFilter::Nifty100),
                ..PreferencesUpdate::default()
            })
            .await
            .unwrap();
        settle().await;
        assert_eq!(
            backend.call_args("fetch_suggestions").await,
            vec!["nifty_50".to_string(), "nifty_100".to_string()]
        );
        dashboard.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_combined_preference_update_repolls_once() {
        let (dashboard, backend, _rx) = dashboard(true).await;
        dashboard.start().await.unwrap();
        settle().await;

        let prefs = dashboard
            .update_preferences(PreferencesUpdate {
                auto_alert_enabled: Some(false),
                refresh_interval_ms: Some(30_000),
                index_filter: Some(IndexFilter::Nifty200),
            })
            .await
            .unwrap();
        settle().await;

        assert_eq!(
            backend.call_args("fetch_suggestions").await,
            vec!["nifty_50".to_string(), "nifty_200".to_string()]
        );
        assert_eq!(dashboard.poller.params().await, prefs.poll_params());
        assert!(!dashboard.alerts.notifications_enabled());
        dashboard.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_interval_keeps_polling() {
        let (dashboard, backend, _rx) = dashboard(true).await;
        dashboard.start().await.unwrap();
        settle().await;

        let update = PreferencesUpdate {
            refresh_interval_ms: Some(20_000),
            index_filter: Some(IndexFilter::Nifty500),
            ..PreferencesUpdate::default()
        };
        assert!(matches!(dashboard.update_preferences(update).await, Err(ApiError::Validation(_))));
        settle().await;
        assert_eq!(backend.call_count("fetch_suggestions").await, 1);
        assert_eq!(dashboard.preferences.get().index_filter, IndexFilter::Nifty50);
        dashboard.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_reconciles_portfolio() {
        let (dashboard, backend, _rx) = dashboard(false).await;
        backend
            .set_portfolio(vec![BackendPosition {
                symbol: "ITC".to_string(),
                close: 450.0,
                quantity: Some(100),
                sold_targets: None,
                highest_price: None,
            }])
            .await;
        dashboard.start().await.unwrap();
        settle().await;
        assert!(dashboard.portfolio.positions().is_empty());
        assert_eq!(backend.call_count("fetch_suggestions").await, 0);

        backend.set_logged_in(true).await;
        dashboard.session.check_session().await;
        settle().await;
        assert!(dashboard.portfolio.contains("ITC"));
        assert_eq!(backend.call_count("fetch_suggestions").await, 1);
        dashboard.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconciled_position_alerts_without_new_poll() {
        let (dashboard, backend, mut rx) = dashboard(false).await;
        dashboard.restore().await;
        assert!(matches!(dashboard.refresh().await, TickOutcome::Updated { count: 2 }));

        let monitor = tokio::spawn(run_monitor(
            dashboard.session.clone(),
            dashboard.portfolio.clone(),
            dashboard.alerts.clone(),
            dashboard.poller.subscribe(),
        ));
        settle().await;
        assert!(dashboard.alerts.current().is_empty());

        backend
            .set_portfolio(vec![BackendPosition {
                symbol: "TCS".to_string(),
                close: 100.0,
                quantity: Some(100),
                sold_targets: None,
                highest_price: None,
            }])
            .await;
        backend.set_logged_in(true).await;
        dashboard.session.check_session().await;
        settle().await;

        assert!(dashboard.portfolio.contains("TCS"));
        assert_eq!(dashboard.alerts.current().len(), 1);
        assert_eq!(dashboard.alerts.current()[0].symbol, "TCS");
        assert_eq!(backend.call_count("fetch_suggestions").await, 1);
        assert_eq!(
            tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap().as_deref(),
            Some("TCS")
        );
        monitor.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_track_at_price() {
        let (dashboard, _backend, _rx) = dashboard(true).await;
        dashboard.track_at("RELIANCE", dec!(2500)).await.unwrap();
        assert_eq!(dashboard.portfolio.get("RELIANCE").unwrap().stop_loss, dec!(2425.00));
    }
}
