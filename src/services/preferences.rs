//! User preferences
//!
//! Alert toggle, refresh interval and index filter. Each setter writes
//! through to the store and publishes the new value on a watch channel.

use crate::errors::ApiError;
use crate::services::persistence::{Persistence, StoreKey};
use crate::services::poller::{PollParams, DEFAULT_INTERVAL_MS};
use crate::types::IndexFilter;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info};

/// Smallest refresh interval the control surface accepts
pub const MIN_REFRESH_INTERVAL_MS: u64 = 15_000;
/// Refresh interval granularity
pub const REFRESH_STEP_MS: u64 = 15_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    pub auto_alert_enabled: bool,
    pub refresh_interval_ms: u64,
    pub index_filter: IndexFilter,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            auto_alert_enabled: true,
            refresh_interval_ms: DEFAULT_INTERVAL_MS,
            index_filter: IndexFilter::default(),
        }
    }
}

impl Preferences {
    pub fn poll_params(&self) -> PollParams {
        PollParams {
            interval: Duration::from_millis(self.refresh_interval_ms),
            filter: self.index_filter,
        }
    }
}

/// Partial update; absent fields are left as they are
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferencesUpdate {
    pub auto_alert_enabled: Option<bool>,
    pub refresh_interval_ms: Option<u64>,
    pub index_filter: Option<IndexFilter>,
}

impl PreferencesUpdate {
    /// Whether the update touches the polling parameters
    pub fn changes_polling(&self) -> bool {
        self.refresh_interval_ms.is_some() || self.index_filter.is_some()
    }
}

/// Check a refresh interval coming from the control surface
pub fn validate_refresh_interval(ms: u64) -> Result<u64, ApiError> {
    if ms < MIN_REFRESH_INTERVAL_MS {
        return Err(ApiError::Validation(format!(
            "refresh interval must be at least {} ms",
            MIN_REFRESH_INTERVAL_MS
        )));
    }
    if ms % REFRESH_STEP_MS != 0 {
        return Err(ApiError::Validation(format!(
            "refresh interval must be a multiple of {} ms",
            REFRESH_STEP_MS
        )));
    }
    Ok(ms)
}

/// Nearest valid interval, never below the minimum
pub fn snap_refresh_interval(ms: u64) -> u64 {
    let steps = ms.saturating_add(REFRESH_STEP_MS / 2) / REFRESH_STEP_MS;
    (steps * REFRESH_STEP_MS).max(MIN_REFRESH_INTERVAL_MS)
}

pub struct PreferenceStore {
    persistence: Persistence,
    /// Serializes read-modify-write of the current value
    write_lock: Mutex<()>,
    prefs_tx: watch::Sender<Preferences>,
}

impl PreferenceStore {
    pub fn new(persistence: Persistence, defaults: Preferences) -> Self {
        let (prefs_tx, _) = watch::channel(defaults);
        Self {
            persistence,
            write_lock: Mutex::new(()),
            prefs_tx,
        }
    }

    /// Load persisted values over the defaults
    pub async fn load(&self) -> Preferences {
        let defaults = self.get();

        let auto_alert_enabled = match self.persistence.load::<bool>(StoreKey::AutoAlert).await {
            Some(enabled) => enabled,
            None => match self.persistence.load::<bool>(StoreKey::LegacyAutoEmail).await {
                Some(enabled) => {
                    debug!("Migrating legacy autoEmail flag ({})", enabled);
                    self.persistence.save(StoreKey::AutoAlert, &enabled).await;
                    self.persistence.remove(StoreKey::LegacyAutoEmail).await;
                    enabled
                }
                None => defaults.auto_alert_enabled,
            },
        };

        let refresh_interval_ms = match self.persistence.load::<u64>(StoreKey::RefreshInterval).await {
            Some(stored) => {
                let snapped = snap_refresh_interval(stored);
                if snapped != stored {
                    debug!("Snapped stored refresh interval {} ms to {} ms", stored, snapped);
                }
                snapped
            }
            None => defaults.refresh_interval_ms,
        };

        let index_filter = self
            .persistence
            .load(StoreKey::IndexFilter)
            .await
            .unwrap_or(defaults.index_filter);

        let prefs = Preferences {
            auto_alert_enabled,
            refresh_interval_ms,
            index_filter,
        };
        self.prefs_tx.send_replace(prefs);
        prefs
    }

    pub fn get(&self) -> Preferences {
        *self.prefs_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Preferences> {
        self.prefs_tx.subscribe()
    }

    /// Validate, persist and publish an update. An invalid interval
    /// rejects the whole update.
    pub async fn update(&self, update: PreferencesUpdate) -> Result<Preferences, ApiError> {
        let interval = update.refresh_interval_ms.map(validate_refresh_interval).transpose()?;
        let _guard = self.write_lock.lock().await;

        if let Some(enabled) = update.auto_alert_enabled {
            self.persistence.save(StoreKey::AutoAlert, &enabled).await;
            info!("Auto alert {}", if enabled { "enabled" } else { "disabled" });
        }
        if let Some(ms) = interval {
            self.persistence.save(StoreKey::RefreshInterval, &ms).await;
            info!("Refresh interval set to {} ms", ms);
        }
        if let Some(filter) = update.index_filter {
            self.persistence.save(StoreKey::IndexFilter, &filter).await;
            info!("Index filter set to {}", filter);
        }

        Ok(self.publish(|p| {
            if let Some(enabled) = update.auto_alert_enabled {
                p.auto_alert_enabled = enabled;
            }
            if let Some(ms) = interval {
                p.refresh_interval_ms = ms;
            }
            if let Some(filter) = update.index_filter {
                p.index_filter = filter;
            }
        }))
    }

    fn publish(&self, apply: impl FnOnce(&mut Preferences)) -> Preferences {
        self.prefs_tx.send_modify(apply);
        self.get()
    }
}
