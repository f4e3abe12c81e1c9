//! Dismissal ledger: symbols whose exit alerts the user acknowledged

use crate::services::persistence::{Persistence, StoreKey};
use std::collections::BTreeSet;
use tokio::sync::RwLock;
use tracing::info;

pub struct DismissalLedger {
    dismissed: RwLock<BTreeSet<String>>,
    persistence: Persistence,
}

impl DismissalLedger {
    pub fn new(persistence: Persistence) -> Self {
        Self {
            dismissed: RwLock::new(BTreeSet::new()),
            persistence,
        }
    }

    /// Load persisted dismissals
    pub async fn load(&self) {
        let stored: Vec<String> = self
            .persistence
            .load_or(StoreKey::DismissedAlerts, Vec::new())
            .await;
        let mut dismissed = self.dismissed.write().await;
        *dismissed = stored.into_iter().collect();
        info!("Loaded {} dismissed alerts", dismissed.len());
    }

    /// Acknowledge a symbol. Returns false if it was already dismissed.
    pub async fn dismiss(&self, symbol: &str) -> bool {
        let mut dismissed = self.dismissed.write().await;
        let added = dismissed.insert(symbol.to_string());
        if added {
            info!("Dismissed exit alert for {}", symbol);
            self.persist(&dismissed).await;
        }
        added
    }

    /// Forget a dismissal. Returns false if there was none.
    pub async fn clear(&self, symbol: &str) -> bool {
        let mut dismissed = self.dismissed.write().await;
        let removed = dismissed.remove(symbol);
        if removed {
            info!("Cleared dismissal for {}", symbol);
            self.persist(&dismissed).await;
        }
        removed
    }

    pub async fn contains(&self, symbol: &str) -> bool {
        self.dismissed.read().await.contains(symbol)
    }

    pub async fn snapshot(&self) -> BTreeSet<String> {
        self.dismissed.read().await.clone()
    }

    async fn persist(&self, dismissed: &BTreeSet<String>) {
        let list: Vec<&String> = dismissed.iter().collect();
        self.persistence.save(StoreKey::DismissedAlerts, &list).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dismiss_persists_immediately() {
        let persistence = Persistence::in_memory();
        let ledger = DismissalLedger::new(persistence.clone());

        assert!(ledger.dismiss("INFY").await);
        assert!(!ledger.dismiss("INFY").await);
        assert_eq!(
            persistence.load::<Vec<String>>(StoreKey::DismissedAlerts).await,
            Some(vec!["INFY".to_string()])
        );

        let reloaded = DismissalLedger::new(persistence);
        reloaded.load().await;
        assert!(reloaded.contains("INFY").await);
    }

    #[tokio::test]
    async fn test_clear() {
        let ledger = DismissalLedger::new(Persistence::in_memory());
        ledger.dismiss("TCS").await;
        assert!(ledger.clear("TCS").await);
        assert!(!ledger.clear("TCS").await);
        assert!(!ledger.contains("TCS").await);
    }
}
