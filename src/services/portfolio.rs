//! Portfolio store
//!
//! Local set of tracked positions, mutated optimistically and synced with
//! the backend of record. On a failed backend call the local change is
//! rolled back unless rollback is disabled, in which case the next
//! [`PortfolioStore::reconcile`] repairs it.

use crate::client::{price_to_f64, Backend, BackendPosition, NewPosition};
use crate::errors::ApiError;
use crate::services::persistence::{Persistence, StoreKey};
use crate::services::session::SessionManager;
use crate::types::{Position, Suggestion};
use regex::Regex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex, OnceLock, PoisonError};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct PortfolioSettings {
    pub default_quantity: u32,
    /// Stop placed this fraction under the entry close
    pub stop_loss_pct: Decimal,
    pub rollback_on_failure: bool,
}

impl Default for PortfolioSettings {
    fn default() -> Self {
        Self {
            default_quantity: 100,
            stop_loss_pct: dec!(0.03),
            rollback_on_failure: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackOutcome {
    Tracked,
    AlreadyTracked,
}

fn symbol_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Z0-9][A-Z0-9&_\-]{0,19}$").expect("valid symbol regex"))
}

/// Normalize a ticker, rejecting anything that is not an exchange symbol
pub fn normalize_symbol(symbol: &str) -> Result<String, ApiError> {
    let symbol = symbol.trim().to_uppercase();
    if symbol.is_empty() {
        return Err(ApiError::Validation("symbol is required".to_string()));
    }
    if !symbol_pattern().is_match(&symbol) {
        return Err(ApiError::Validation(format!("'{}' is not a valid symbol", symbol)));
    }
    Ok(symbol)
}

/// The backend answers a duplicate create with 400 "already exists"
fn is_duplicate_create(err: &ApiError) -> bool {
    matches!(err, ApiError::Rejected { status: 400, body } if body.to_lowercase().contains("already exists"))
}

/// ...and a delete of an unknown symbol with 404
fn is_missing_delete(err: &ApiError) -> bool {
    matches!(err, ApiError::Rejected { status: 404, .. })
}

fn to_price(value: f64) -> Option<Decimal> {
    if !value.is_finite() {
        return None;
    }
    Decimal::try_from(value).ok().map(|d| d.round_dp(2))
}

/// Marks a symbol as having a backend call in flight until dropped
struct PendingChange<'a> {
    pending: &'a StdMutex<HashSet<String>>,
    symbol: String,
}

impl Drop for PendingChange<'_> {
    fn drop(&mut self) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.symbol);
    }
}

pub struct PortfolioStore {
    backend: Arc<dyn Backend>,
    session: Arc<SessionManager>,
    persistence: Persistence,
    settings: PortfolioSettings,
    /// Never held across a backend call
    positions: Mutex<Vec<Position>>,
    positions_tx: watch::Sender<Arc<Vec<Position>>>,
    /// Symbols whose track, untrack or target update is awaiting the backend
    pending: StdMutex<HashSet<String>>,
}

impl PortfolioStore {
    pub fn new(
        backend: Arc<dyn Backend>,
        session: Arc<SessionManager>,
        persistence: Persistence,
        settings: PortfolioSettings,
    ) -> Self {
        let (positions_tx, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            backend,
            session,
            persistence,
            settings,
            positions: Mutex::new(Vec::new()),
            positions_tx,
            pending: StdMutex::new(HashSet::new()),
        }
    }

    /// Load the last persisted portfolio
    pub async fn load_cached(&self) {
        let cached: Vec<Position> = self.persistence.load_or(StoreKey::Portfolio, Vec::new()).await;
        debug!("Restored {} cached positions", cached.len());
        let mut positions = self.positions.lock().await;
        *positions = cached;
        self.positions_tx.send_replace(Arc::new(positions.clone()));
    }

    pub fn positions(&self) -> Arc<Vec<Position>> {
        self.positions_tx.borrow().clone()
    }

    pub fn get(&self, symbol: &str) -> Option<Position> {
        self.positions_tx.borrow().iter().find(|p| p.symbol == symbol).cloned()
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.get(symbol).is_some()
    }

    /// Persist and publish. Called with the positions lock held.
    async fn commit(&self, positions: &[Position]) {
        self.persistence.save(StoreKey::Portfolio, &positions).await;
        self.positions_tx.send_replace(Arc::new(positions.to_vec()));
    }

    fn claim(&self, symbol: &str) -> Result<PendingChange<'_>, ApiError> {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if !pending.insert(symbol.to_string()) {
            return Err(ApiError::Validation(format!("{} has a change in flight", symbol)));
        }
        Ok(PendingChange {
            pending: &self.pending,
            symbol: symbol.to_string(),
        })
    }

    fn pending_symbols(&self) -> HashSet<String> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    async fn report(&self, action: &str, symbol: &str, err: &ApiError) {
        if !self.session.handle_failure(err).await {
            warn!("Failed to {} {}: {}", action, symbol, err);
        }
    }

    /// Track a suggestion at its current close
    pub async fn track(&self, suggestion: &Suggestion) -> Result<TrackOutcome, ApiError> {
        let close = suggestion
            .close_price()
            .ok_or_else(|| ApiError::Validation(format!("{} has no close price", suggestion.symbol)))?;
        self.track_at(&suggestion.symbol, close).await
    }

    /// Track `symbol` with `close` as the entry price
    pub async fn track_at(&self, symbol: &str, close: Decimal) -> Result<TrackOutcome, ApiError> {
        let symbol = normalize_symbol(symbol)?;
        if close <= Decimal::ZERO {
            return Err(ApiError::Validation(format!("{} needs a positive entry price", symbol)));
        }

        let (position, _pending) = {
            let mut positions = self.positions.lock().await;
            if positions.iter().any(|p| p.symbol == symbol) {
                debug!("{} already tracked", symbol);
                return Ok(TrackOutcome::AlreadyTracked);
            }
            let pending = self.claim(&symbol)?;

            let position = Position::open(
                &symbol,
                close,
                self.settings.default_quantity,
                self.settings.stop_loss_pct,
            );
            positions.push(position.clone());
            self.commit(&positions).await;
            (position, pending)
        };

        let request = NewPosition {
            symbol: symbol.clone(),
            close: price_to_f64(close),
            quantity: position.quantity,
        };
        match self.backend.add_position(&request).await {
            Ok(()) => {
                info!("Tracking {} at {} (stop {})", symbol, close, position.stop_loss);
                Ok(TrackOutcome::Tracked)
            }
            Err(e) if is_duplicate_create(&e) => {
                debug!("{} already on the backend", symbol);
                Ok(TrackOutcome::Tracked)
            }
            Err(e) => {
                self.report("track", &symbol, &e).await;
                if self.settings.rollback_on_failure {
                    let mut positions = self.positions.lock().await;
                    positions.retain(|p| p.symbol != symbol);
                    self.commit(&positions).await;
                }
                Err(e)
            }
        }
    }

    /// Stop tracking `symbol`. Returns whether it was tracked locally.
    pub async fn untrack(&self, symbol: &str) -> Result<bool, ApiError> {
        let symbol = normalize_symbol(symbol)?;

        let (removed, _pending) = {
            let mut positions = self.positions.lock().await;
            let pending = self.claim(&symbol)?;
            let removed = positions
                .iter()
                .position(|p| p.symbol == symbol)
                .map(|index| (index, positions.remove(index)));
            if removed.is_some() {
                self.commit(&positions).await;
            }
            (removed, pending)
        };

        match self.backend.remove_position(&symbol).await {
            Ok(()) => {}
            Err(e) if is_missing_delete(&e) => debug!("{} was not on the backend", symbol),
            Err(e) => {
                self.report("untrack", &symbol, &e).await;
                if self.settings.rollback_on_failure {
                    if let Some((index, position)) = removed {
                        let mut positions = self.positions.lock().await;
                        if !positions.iter().any(|p| p.symbol == symbol) {
                            let index = index.min(positions.len());
                            positions.insert(index, position);
                            self.commit(&positions).await;
                        }
                    }
                }
                return Err(e);
            }
        }

        info!("Untracked {}", symbol);
        Ok(removed.is_some())
    }

    /// Replace the local set with the backend's list. Local stop-loss and
    /// entry time are kept for symbols present on both sides.
    pub async fn reconcile(&self) -> Result<usize, ApiError> {
        let remote = match self.backend.fetch_portfolio().await {
            Ok(remote) => remote,
            Err(e) => {
                self.report("reconcile", "portfolio", &e).await;
                return Err(e);
            }
        };

        let pending = self.pending_symbols();
        let mut positions = self.positions.lock().await;
        let mut local: HashMap<String, Position> =
            positions.drain(..).map(|p| (p.symbol.clone(), p)).collect();

        for record in remote {
            if pending.contains(&record.symbol) {
                continue;
            }
            match self.from_backend(&record, local.get(&record.symbol)) {
                Some(position) => positions.push(position),
                None => warn!("Skipping backend position {} with invalid close", record.symbol),
            }
        }
        // In-flight changes keep their local state
        for symbol in &pending {
            if let Some(position) = local.remove(symbol) {
                positions.push(position);
            }
        }

        self.commit(&positions).await;
        info!("Reconciled portfolio: {} positions", positions.len());
        Ok(positions.len())
    }

    fn from_backend(&self, record: &BackendPosition, local: Option<&Position>) -> Option<Position> {
        let entry_price = to_price(record.close)?;
        let remote_high = record.highest_price.and_then(to_price);

        let mut position = match local {
            Some(existing) => Position {
                entry_price,
                ..existing.clone()
            },
            None => Position::open(
                &record.symbol,
                entry_price,
                self.settings.default_quantity,
                self.settings.stop_loss_pct,
            ),
        };
        if let Some(quantity) = record.quantity {
            position.quantity = quantity;
        }
        if let Some(sold) = &record.sold_targets {
            position.sold_targets = sold.clone();
        }
        if let Some(high) = remote_high {
            position.observe_price(high);
        }
        position.observe_price(entry_price);
        Some(position)
    }

    /// Ask the backend to exit a tracked position
    pub async fn trigger_exit(&self, symbol: &str) -> Result<(), ApiError> {
        let symbol = normalize_symbol(symbol)?;
        if !self.contains(&symbol) {
            return Err(ApiError::Validation(format!("{} is not tracked", symbol)));
        }

        if let Err(e) = self.backend.trigger_exit(&symbol).await {
            self.report("exit", &symbol, &e).await;
            return Err(e);
        }
        info!("Exit triggered for {}", symbol);
        Ok(())
    }

    /// Record a realized partial-exit target. Returns false if it was
    /// already recorded.
    pub async fn record_partial_exit(&self, symbol: &str, target: u32) -> Result<bool, ApiError> {
        let symbol = normalize_symbol(symbol)?;

        let (record, _pending) = {
            let mut positions = self.positions.lock().await;
            let Some(index) = positions.iter().position(|p| p.symbol == symbol) else {
                return Err(ApiError::Validation(format!("{} is not tracked", symbol)));
            };
            if positions[index].sold_targets.contains(&target) {
                return Ok(false);
            }
            let pending = self.claim(&symbol)?;

            positions[index].sold_targets.push(target);
            positions[index].sold_targets.sort_unstable();
            self.commit(&positions).await;
            (BackendPosition::from_position(&positions[index]), pending)
        };

        if let Err(e) = self.backend.update_position(&record).await {
            self.report("record partial exit for", &symbol, &e).await;
            if self.settings.rollback_on_failure {
                let mut positions = self.positions.lock().await;
                if let Some(position) = positions.iter_mut().find(|p| p.symbol == symbol) {
                    position.sold_targets.retain(|t| *t != target);
                    self.commit(&positions).await;
                }
            }
            return Err(e);
        }

        info!("Recorded target {} sold for {}", target, symbol);
        Ok(true)
    }

    /// Raise `highest_price` from a fresh suggestion set. Returns how many
    /// positions moved.
    pub async fn observe_prices(&self, suggestions: &[Suggestion]) -> usize {
        let closes: HashMap<&str, Decimal> = suggestions
            .iter()
            .filter_map(|s| s.close_price().map(|c| (s.symbol.as_str(), c)))
            .collect();

        let mut positions = self.positions.lock().await;
        let mut moved = 0;
        for position in positions.iter_mut() {
            if let Some(close) = closes.get(position.symbol.as_str()) {
                if position.observe_price(*close) {
                    moved += 1;
                }
            }
        }
        if moved > 0 {
            self.commit(&positions).await;
        }
        moved
    }
}
