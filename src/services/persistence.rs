//! Persistence port
//!
//! Components never touch the storage medium directly: they receive a
//! [`Persistence`] handle wrapping any [`KeyValueStore`]. Values are JSON,
//! wrapped in a versioned envelope so stored shapes can evolve.

use anyhow::Result;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Current envelope version
pub const SCHEMA_VERSION: u32 = 1;

/// String-keyed durable store
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
}

/// Keys written by the tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKey {
    Portfolio,
    DismissedAlerts,
    AutoAlert,
    /// Name used for the alert toggle by older dashboards
    LegacyAutoEmail,
    RefreshInterval,
    IndexFilter,
    SessionFlag,
    LatestSuggestions,
}

impl StoreKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreKey::Portfolio => "portfolio",
            StoreKey::DismissedAlerts => "dismissedAlerts",
            StoreKey::AutoAlert => "autoAlert",
            StoreKey::LegacyAutoEmail => "autoEmail",
            StoreKey::RefreshInterval => "refreshInterval",
            StoreKey::IndexFilter => "indexFilter",
            StoreKey::SessionFlag => "kiteLoggedIn",
            StoreKey::LatestSuggestions => "stocks",
        }
    }
}

#[derive(Serialize)]
struct EnvelopeRef<'a, T> {
    version: u32,
    data: &'a T,
}

#[derive(Deserialize)]
struct Envelope<T> {
    version: u32,
    data: T,
}

/// Typed, versioned access to a [`KeyValueStore`]
#[derive(Clone)]
pub struct Persistence {
    store: Arc<dyn KeyValueStore>,
}

impl Persistence {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// In-memory persistence, nothing survives the process
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Load a value. Missing, unreadable or future-versioned entries yield `None`.
    pub async fn load<T: DeserializeOwned>(&self, key: StoreKey) -> Option<T> {
        let raw = match self.store.get(key.as_str()).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!("Failed to read '{}' from store: {}", key.as_str(), e);
                return None;
            }
        };

        decode(key, &raw)
    }

    pub async fn load_or<T: DeserializeOwned>(&self, key: StoreKey, default: T) -> T {
        self.load(key).await.unwrap_or(default)
    }

    /// Write-through save. Failures are logged; state in memory stays authoritative.
    pub async fn save<T: Serialize>(&self, key: StoreKey, value: &T) {
        let envelope = EnvelopeRef {
            version: SCHEMA_VERSION,
            data: value,
        };

        let raw = match serde_json::to_string(&envelope) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Failed to serialize '{}': {}", key.as_str(), e);
                return;
            }
        };

        if let Err(e) = self.store.set(key.as_str(), &raw).await {
            warn!("Failed to persist '{}': {}", key.as_str(), e);
        }
    }

    pub async fn remove(&self, key: StoreKey) {
        if let Err(e) = self.store.remove(key.as_str()).await {
            warn!("Failed to remove '{}': {}", key.as_str(), e);
        }
    }
}

fn decode<T: DeserializeOwned>(key: StoreKey, raw: &str) -> Option<T> {
    if let Ok(envelope) = serde_json::from_str::<Envelope<serde_json::Value>>(raw) {
        if envelope.version > SCHEMA_VERSION {
            warn!(
                "Ignoring '{}': stored with schema v{}, this build reads up to v{}",
                key.as_str(),
                envelope.version,
                SCHEMA_VERSION
            );
            return None;
        }
        return match serde_json::from_value(envelope.data) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Discarding unreadable '{}': {}", key.as_str(), e);
                None
            }
        };
    }

    // Unversioned values from older builds (schema v0)
    let legacy = serde_json::from_str::<T>(raw)
        .ok()
        .or_else(|| serde_json::from_value(serde_json::Value::String(raw.to_string())).ok());

    if legacy.is_some() {
        debug!("Read '{}' as an unversioned legacy value", key.as_str());
    } else {
        warn!("Discarding unreadable legacy '{}'", key.as_str());
    }
    legacy
}

/// Process-local [`KeyValueStore`]
#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries.write().await.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_then_load() {
        let persistence = Persistence::in_memory();
        persistence.save(StoreKey::RefreshInterval, &45_000u64).await;
        assert_eq!(persistence.load::<u64>(StoreKey::RefreshInterval).await, Some(45_000));
        assert_eq!(persistence.load::<u64>(StoreKey::IndexFilter).await, None);
    }

    #[tokio::test]
    async fn test_values_are_enveloped() {
        let store = MemoryStore::new();
        let persistence = Persistence::new(Arc::new(store.clone()));
        persistence.save(StoreKey::AutoAlert, &false).await;

        let raw = store.get("autoAlert").await.unwrap().unwrap();
        assert_eq!(raw, r#"{"version":1,"data":false}"#);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_remove_deletes_entry() {
        let store = MemoryStore::new();
        let persistence = Persistence::new(Arc::new(store.clone()));
        persistence.save(StoreKey::LegacyAutoEmail, &true).await;
        assert!(!store.is_empty().await);

        persistence.remove(StoreKey::LegacyAutoEmail).await;
        assert!(store.is_empty().await);
        assert_eq!(persistence.load::<bool>(StoreKey::LegacyAutoEmail).await, None);
    }

    #[tokio::test]
    async fn test_legacy_unversioned_values() {
        let store = MemoryStore::new();
        store.set("autoEmail", "true").await.unwrap();
        store.set("dismissedAlerts", r#"["INFY","TCS"]"#).await.unwrap();
        store.set("indexFilter", "nifty_200").await.unwrap();

        let persistence = Persistence::new(Arc::new(store));
        assert_eq!(persistence.load::<bool>(StoreKey::LegacyAutoEmail).await, Some(true));
        assert_eq!(
            persistence.load::<Vec<String>>(StoreKey::DismissedAlerts).await,
            Some(vec!["INFY".to_string(), "TCS".to_string()])
        );
        assert_eq!(
            persistence.load::<crate::types::IndexFilter>(StoreKey::IndexFilter).await,
            Some(crate::types::IndexFilter::Nifty200)
        );
    }

    #[tokio::test]
    async fn test_future_version_is_ignored() {
        let store = MemoryStore::new();
        store.set("refreshInterval", r#"{"version":99,"data":30000}"#).await.unwrap();

        let persistence = Persistence::new(Arc::new(store));
        assert_eq!(persistence.load_or(StoreKey::RefreshInterval, 60_000u64).await, 60_000);
    }

    #[tokio::test]
    async fn test_corrupt_value_falls_back() {
        let store = MemoryStore::new();
        store.set("portfolio", "{not json").await.unwrap();

        let persistence = Persistence::new(Arc::new(store));
        let loaded: Vec<crate::types::Position> = persistence.load_or(StoreKey::Portfolio, Vec::new()).await;
        assert!(loaded.is_empty());
    }
}
