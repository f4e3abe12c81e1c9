//! Suggestion poller
//!
//! Fetches the candidate list on a fixed interval and replaces the current
//! set on every successful fetch. The loop lives in a single task owned by a
//! [`Scheduler`]; changing the interval or the index filter aborts it and
//! starts a fresh generation. Results from an older generation are dropped.

use crate::client::Backend;
use crate::errors::ApiError;
use crate::services::persistence::{Persistence, StoreKey};
use crate::services::session::{SessionManager, SessionStatus};
use crate::types::{IndexFilter, Suggestion};
use anyhow::{ensure, Result};
use chrono::{DateTime, Utc};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Default refresh interval (60s)
pub const DEFAULT_INTERVAL_MS: u64 = 60_000;

/// When scheduled ticks are allowed to fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PollGate {
    /// Only while the broker session is `LoggedIn`
    #[default]
    SessionLoggedIn,
    Always,
}

impl FromStr for PollGate {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "session" | "logged_in" => Ok(PollGate::SessionLoggedIn),
            "always" => Ok(PollGate::Always),
            other => Err(format!("unknown poll gate '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollParams {
    pub interval: Duration,
    pub filter: IndexFilter,
}

impl Default for PollParams {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(DEFAULT_INTERVAL_MS),
            filter: IndexFilter::default(),
        }
    }
}

/// Result of one fetch attempt
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Updated { count: usize },
    /// Session gate closed
    Gated,
    /// A fetch of this generation is still running
    SkippedInFlight,
    /// Parameters changed while the request was out
    Stale,
    Failed(ApiError),
}

/// Single cancellable handle to the polling task
#[derive(Default)]
pub struct Scheduler {
    handle: Option<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a new task, aborting the previous one
    pub fn replace(&mut self, handle: JoinHandle<()>) {
        self.cancel();
        self.handle = Some(handle);
    }

    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map_or(false, |h| !h.is_finished())
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Clears the in-flight marker when the fetch ends or its task is aborted
struct InFlight<'a> {
    slot: &'a AtomicU64,
    generation: u64,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let _ = self
            .slot
            .compare_exchange(self.generation, 0, Ordering::SeqCst, Ordering::SeqCst);
    }
}

struct PollerShared {
    backend: Arc<dyn Backend>,
    session: Arc<SessionManager>,
    persistence: Persistence,
    gate: PollGate,
    generation: AtomicU64,
    /// Generation with a fetch in flight, 0 when idle
    in_flight: AtomicU64,
    suggestions_tx: watch::Sender<Arc<Vec<Suggestion>>>,
    last_error: RwLock<Option<ApiError>>,
    last_updated: RwLock<Option<DateTime<Utc>>>,
}

impl PollerShared {
    async fn tick(&self, generation: u64, filter: IndexFilter, gated: bool) -> TickOutcome {
        if gated && self.gate == PollGate::SessionLoggedIn && !self.session.status().is_logged_in() {
            debug!("Poll skipped, Kite session is {:?}", self.session.status());
            return TickOutcome::Gated;
        }

        if self.in_flight.swap(generation, Ordering::SeqCst) == generation {
            debug!("Poll skipped, previous fetch still running");
            return TickOutcome::SkippedInFlight;
        }
        let _guard = InFlight {
            slot: &self.in_flight,
            generation,
        };

        let result = self.backend.fetch_suggestions(filter).await;

        if self.generation.load(Ordering::SeqCst) != generation {
            debug!("Discarding {} suggestions from superseded poll", filter);
            return TickOutcome::Stale;
        }

        match result {
            Ok(suggestions) => {
                let count = suggestions.len();
                self.persistence.save(StoreKey::LatestSuggestions, &suggestions).await;
                self.suggestions_tx.send_replace(Arc::new(suggestions));
                *self.last_error.write().await = None;
                *self.last_updated.write().await = Some(Utc::now());
                debug!("Fetched {} suggestions for {}", count, filter);
                TickOutcome::Updated { count }
            }
            Err(e) => {
                if self.session.handle_failure(&e).await {
                    warn!("Suggestion fetch rejected, session expired: {}", e);
                } else {
                    warn!("Error fetching suggestions: {}", e);
                }
                *self.last_error.write().await = Some(e.clone());
                TickOutcome::Failed(e)
            }
        }
    }

    async fn run(
        self: Arc<Self>,
        generation: u64,
        params: PollParams,
        mut session_rx: watch::Receiver<SessionStatus>,
    ) {
        info!(
            "Suggestion poller started (filter: {}, interval: {:?})",
            params.filter, params.interval
        );

        let mut ticker = tokio::time::interval(params.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut settled = *session_rx.borrow_and_update();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick(generation, params.filter, true).await;
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
                    if entered && self.gate == PollGate::SessionLoggedIn {
                        debug!("Session logged in, polling now");
                        ticker.reset_immediately();
                    }
                }
            }
        }
    }
}

struct LoopState {
    params: PollParams,
    scheduler: Scheduler,
}

pub struct SuggestionPoller {
    shared: Arc<PollerShared>,
    state: Mutex<LoopState>,
}

impl SuggestionPoller {
    pub fn new(
        backend: Arc<dyn Backend>,
        session: Arc<SessionManager>,
        persistence: Persistence,
        gate: PollGate,
    ) -> Self {
        let (suggestions_tx, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            shared: Arc::new(PollerShared {
                backend,
                session,
                persistence,
                gate,
                generation: AtomicU64::new(1),
                in_flight: AtomicU64::new(0),
                suggestions_tx,
                last_error: RwLock::new(None),
                last_updated: RwLock::new(None),
            }),
            state: Mutex::new(LoopState {
                params: PollParams::default(),
                scheduler: Scheduler::new(),
            }),
        }
    }

    /// Show the last persisted suggestion set until the first fetch lands
    pub async fn restore_cached(&self) {
        if let Some(cached) = self
            .shared
            .persistence
            .load::<Vec<Suggestion>>(StoreKey::LatestSuggestions)
            .await
        {
            debug!("Restored {} cached suggestions", cached.len());
            self.shared.suggestions_tx.send_replace(Arc::new(cached));
        }
    }

    /// Start (or restart) the loop with `params`; the first tick fires at once
    pub async fn start(&self, params: PollParams) -> Result<()> {
        ensure!(!params.interval.is_zero(), "refresh interval must be non-zero");

        let mut state = self.state.lock().await;
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        state.params = params;
        let task = tokio::spawn(
            self.shared
                .clone()
                .run(generation, params, self.shared.session.subscribe()),
        );
        state.scheduler.replace(task);
        Ok(())
    }

    /// Apply new parameters. A running loop restarts only if they changed;
    /// a stopped one just records them.
    pub async fn update_params(&self, params: PollParams) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            if !state.scheduler.is_running() {
                ensure!(!params.interval.is_zero(), "refresh interval must be non-zero");
                state.params = params;
                return Ok(());
            }
            if state.params == params {
                return Ok(());
            }
        }
        self.start(params).await
    }

    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        state.scheduler.cancel();
        info!("Suggestion poller stopped");
    }

    /// User-initiated fetch with the current parameters. Not session-gated.
    pub async fn refresh_now(&self) -> TickOutcome {
        let filter = self.state.lock().await.params.filter;
        let generation = self.shared.generation.load(Ordering::SeqCst);
        self.shared.tick(generation, filter, false).await
    }

    /// One-shot fetch for `filter` that leaves the current set untouched
    pub async fn fetch_suggestions(&self, filter: IndexFilter) -> Result<Vec<Suggestion>, ApiError> {
        match self.shared.backend.fetch_suggestions(filter).await {
            Ok(suggestions) => Ok(suggestions),
            Err(e) => {
                self.shared.session.handle_failure(&e).await;
                Err(e)
            }
        }
    }

    pub fn suggestions(&self) -> Arc<Vec<Suggestion>> {
        self.shared.suggestions_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Vec<Suggestion>>> {
        self.shared.suggestions_tx.subscribe()
    }

    pub async fn params(&self) -> PollParams {
        self.state.lock().await.params
    }

    pub async fn is_running(&self) -> bool {
        self.state.lock().await.scheduler.is_running()
    }

    pub async fn last_error(&self) -> Option<ApiError> {
        self.shared.last_error.read().await.clone()
    }

    pub async fn last_updated(&self) -> Option<DateTime<Utc>> {
        *self.shared.last_updated.read().await
    }
}
