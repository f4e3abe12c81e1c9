//! Stateful services behind the dashboard

pub mod exit_alerts;
pub mod notifier;
pub mod persistence;
pub mod poller;
pub mod portfolio;
pub mod preferences;
pub mod session;
pub mod stock_checker;

pub use exit_alerts::{DismissalPolicy, ExitAlert, ExitAlertEngine, ExitReason, ExitThresholds};
pub use notifier::{EmailAlertNotifier, Notifier, NotifyError};
pub use persistence::{KeyValueStore, MemoryStore, Persistence, StoreKey};
pub use poller::{PollGate, PollParams, Scheduler, SuggestionPoller, TickOutcome};
pub use portfolio::{PortfolioSettings, PortfolioStore, TrackOutcome};
pub use preferences::{PreferenceStore, Preferences, PreferencesUpdate};
pub use session::{CallbackOutcome, CallbackParams, LoginSettings, SessionManager, SessionStatus};
pub use stock_checker::StockChecker;
