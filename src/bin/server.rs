//! Swing Watch Web Server
//!
//! Runs the dashboard in the background and serves it over HTTP.

use anyhow::Result;
use std::net::SocketAddr;
use swing_watch::api::{create_app, AppState};
use swing_watch::Config;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Default to info for the tracker itself. Override with RUST_LOG.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,swing_watch=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    // Load configuration
    let config = Config::from_env()?;

    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║       SWING WATCH - WEB SERVER                               ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  Backend: {:<50} ║", config.backend_url);
    println!("║  Poll gate: {:<48} ║", format!("{:?}", config.poll_gate));
    println!("║  Discord Webhook: {:<42} ║", if config.discord_webhook_url.is_some() { "ENABLED" } else { "DISABLED" });
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();

    // Create application state
    info!("Initializing application state...");
    let port = config.server_port;
    let state = AppState::new(config).await?;
    state.dashboard.start().await?;

    let dashboard = state.dashboard.clone();
    let app = create_app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down...");
        })
        .await?;

    dashboard.shutdown().await;
    Ok(())
}
