//! Swing Watch Library
//!
//! Tracks a swing-trading watch-list against a scoring backend:
//!
//! 1. **Session**: Kite login validity gates live data; any authorization
//!    failure expires it until the user logs in again.
//!
//! 2. **Polling**: the suggestion set is refreshed on a cancellable timer
//!    that restarts whenever the interval or index filter changes.
//!
//! 3. **Exit alerts**: every tracked position is checked against indicator
//!    rules and its stop-loss, notifying once per unresolved condition.

pub mod api;
pub mod client;
pub mod config;
pub mod dashboard;
pub mod db;
pub mod errors;
pub mod services;
pub mod types;
pub mod webhook;

#[cfg(test)]
mod testing;

pub use client::{Backend, BackendClient};
pub use config::Config;
pub use dashboard::Dashboard;
pub use db::Database;
pub use errors::ApiError;
pub use types::{IndexFilter, IndicatorSnapshot, Position, Suggestion};
pub use webhook::DiscordWebhook;
