//! Scripted collaborators shared by unit tests

use crate::client::{Backend, BackendPosition, ExitCheckRequest, NewPosition};
use crate::errors::ApiError;
use crate::services::exit_alerts::ExitAlert;
use crate::services::notifier::{Notifier, NotifyError};
use crate::types::{ExitCheck, IndexFilter, IndicatorSnapshot, ScoreCheck, Suggestion};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

#[derive(Default)]
struct MockState {
    logged_in: bool,
    suggestions: HashMap<IndexFilter, Vec<Suggestion>>,
    portfolio: Vec<BackendPosition>,
    fail_next: HashMap<&'static str, VecDeque<ApiError>>,
    fail_always: HashMap<&'static str, ApiError>,
    calls: Vec<(&'static str, String)>,
    delays: HashMap<&'static str, Duration>,
}

/// In-process [`Backend`] with scripted answers and a call log
#[derive(Default)]
pub struct MockBackend {
    state: Mutex<MockState>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_logged_in(&self, logged_in: bool) {
        self.state.lock().await.logged_in = logged_in;
    }

    pub async fn set_suggestions(&self, filter: IndexFilter, suggestions: Vec<Suggestion>) {
        self.state.lock().await.suggestions.insert(filter, suggestions);
    }

    pub async fn set_portfolio(&self, portfolio: Vec<BackendPosition>) {
        self.state.lock().await.portfolio = portfolio;
    }

    pub async fn portfolio_symbols(&self) -> Vec<String> {
        self.state.lock().await.portfolio.iter().map(|p| p.symbol.clone()).collect()
    }

    /// Make every call to `op` take `delay` (use with paused time)
    pub async fn set_delay(&self, op: &'static str, delay: Duration) {
        self.state.lock().await.delays.insert(op, delay);
    }

    pub async fn fail_next(&self, op: &'static str, err: ApiError) {
        self.state.lock().await.fail_next.entry(op).or_default().push_back(err);
    }

    pub async fn fail_always(&self, op: &'static str, err: ApiError) {
        self.state.lock().await.fail_always.insert(op, err);
    }

    pub async fn clear_failures(&self) {
        let mut state = self.state.lock().await;
        state.fail_next.clear();
        state.fail_always.clear();
    }

    pub async fn call_count(&self, op: &str) -> usize {
        self.state.lock().await.calls.iter().filter(|(name, _)| *name == op).count()
    }

    /// Arguments of every call to `op`, in order
    pub async fn call_args(&self, op: &str) -> Vec<String> {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter(|(name, _)| *name == op)
            .map(|(_, arg)| arg.clone())
            .collect()
    }

    async fn record(&self, op: &'static str, arg: impl Into<String>) -> Result<(), ApiError> {
        let (result, delay) = {
            let mut state = self.state.lock().await;
            state.calls.push((op, arg.into()));
            let result = match state.fail_next.get_mut(op).and_then(|q| q.pop_front()) {
                Some(err) => Err(err),
                None => match state.fail_always.get(op) {
                    Some(err) => Err(err.clone()),
                    None => Ok(()),
                },
            };
            (result, state.delays.get(op).copied())
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        result
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn fetch_suggestions(&self, filter: IndexFilter) -> Result<Vec<Suggestion>, ApiError> {
        self.record("fetch_suggestions", filter.as_str()).await?;
        Ok(self
            .state
            .lock()
            .await
            .suggestions
            .get(&filter)
            .cloned()
            .unwrap_or_default())
    }

    async fn fetch_portfolio(&self) -> Result<Vec<BackendPosition>, ApiError> {
        self.record("fetch_portfolio", "").await?;
        Ok(self.state.lock().await.portfolio.clone())
    }

    async fn add_position(&self, position: &NewPosition) -> Result<(), ApiError> {
        self.record("add_position", position.symbol.clone()).await?;
        self.state.lock().await.portfolio.push(BackendPosition {
            symbol: position.symbol.clone(),
            close: position.close,
            quantity: Some(position.quantity),
            sold_targets: Some(Vec::new()),
            highest_price: Some(position.close),
        });
        Ok(())
    }

    async fn update_position(&self, position: &BackendPosition) -> Result<(), ApiError> {
        self.record("update_position", position.symbol.clone()).await?;
        let mut state = self.state.lock().await;
        if let Some(existing) = state.portfolio.iter_mut().find(|p| p.symbol == position.symbol) {
            *existing = position.clone();
        }
        Ok(())
    }

    async fn remove_position(&self, symbol: &str) -> Result<(), ApiError> {
        self.record("remove_position", symbol).await?;
        self.state.lock().await.portfolio.retain(|p| p.symbol != symbol);
        Ok(())
    }

    async fn trigger_exit(&self, symbol: &str) -> Result<(), ApiError> {
        self.record("trigger_exit", symbol).await
    }

    async fn stock_score(&self, symbol: &str) -> Result<ScoreCheck, ApiError> {
        self.record("stock_score", symbol).await?;
        Ok(ScoreCheck {
            symbol: symbol.to_string(),
            score: 7.0,
            suggestion: Some("BUY".to_string()),
            close: 100.0,
            volume: 250_000.0,
        })
    }

    async fn check_exit(&self, request: &ExitCheckRequest) -> Result<ExitCheck, ApiError> {
        self.record("check_exit", request.symbol.clone()).await?;
        Ok(ExitCheck {
            entry_price: request.entry_price,
            current_price: 96.0,
            pnl_percent: -4.0,
            days_held: 3,
            recommendation: "EXIT".to_string(),
            exit_reasons: vec!["RSI below 40".to_string()],
        })
    }

    async fn session_status(&self) -> Result<bool, ApiError> {
        self.record("session_status", "").await?;
        Ok(self.state.lock().await.logged_in)
    }

    async fn login_url(&self) -> Result<String, ApiError> {
        self.record("login_url", "").await?;
        Ok("https://kite.zerodha.com/connect/login?api_key=backend&v=3".to_string())
    }

    async fn complete_login(&self, request_token: &str, _status: &str) -> Result<(), ApiError> {
        self.record("complete_login", request_token).await?;
        self.state.lock().await.logged_in = true;
        Ok(())
    }

    async fn send_exit_email(&self, symbol: &str, _price: Option<f64>) -> Result<(), ApiError> {
        self.record("send_exit_email", symbol).await
    }
}

/// [`Notifier`] that forwards every alert's symbol to a channel
pub struct RecordingNotifier {
    tx: mpsc::UnboundedSender<String>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, fail: false }, rx)
    }

    /// Records the alert, then reports a delivery failure
    pub fn failing() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, fail: true }, rx)
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, alert: &ExitAlert) -> Result<(), NotifyError> {
        let _ = self.tx.send(alert.symbol.clone());
        if self.fail {
            return Err(NotifyError::Delivery("mail server down".to_string()));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

/// Suggestion with the indicators the exit rules read
pub fn suggestion(symbol: &str, macd: f64, rsi: f64, bb: f64, adx: f64, close: f64) -> Suggestion {
    Suggestion {
        symbol: symbol.to_string(),
        indicators: IndicatorSnapshot {
            adx,
            rsi,
            macd,
            bb,
            close,
            ..IndicatorSnapshot::default()
        },
        score: 5.0,
        category: None,
    }
}

/// Suggestion that trips none of the exit rules
pub fn healthy(symbol: &str, close: f64) -> Suggestion {
    suggestion(symbol, 1.0, 55.0, 0.5, 25.0, close)
}

/// Drain a few scheduler turns so spawned tasks run
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}
