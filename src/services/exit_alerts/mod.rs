//! Exit-alert system
//!
//! - Rule thresholds over pre-computed indicators
//! - Dismissal ledger persisted through the store
//! - Engine that evaluates the portfolio and notifies on new alerts

pub mod engine;
pub mod ledger;
pub mod rules;

pub use engine::{enrich, DismissalPolicy, EnrichedPosition, ExitAlert, ExitAlertEngine};
pub use ledger::DismissalLedger;
pub use rules::{ExitReason, ExitThresholds};
