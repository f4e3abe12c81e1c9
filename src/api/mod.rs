//! Web API module for the swing watch-list tracker
//!
//! REST endpoints over the dashboard plus the Kite login callback.

pub mod routes;
pub mod server;

pub use server::{create_app, AppState};
