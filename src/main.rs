//! Swing Watch CLI
//!
//! One-shot commands over the watch-list tracker, plus a foreground
//! `run` mode that polls and prints exit alerts as they appear.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use rust_decimal::Decimal;
use std::sync::Arc;
use swing_watch::dashboard::{Dashboard, DashboardSnapshot};
use swing_watch::services::exit_alerts::ExitAlert;
use swing_watch::services::preferences::PreferencesUpdate;
use swing_watch::services::stock_checker::parse_entry_time;
use swing_watch::types::{IndexFilter, Suggestion};
use swing_watch::Config;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "swing-watch")]
#[command(about = "Swing-trade watch-list tracker with exit alerts")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll continuously and print exit alerts (Ctrl+C to stop)
    Run,

    /// Fetch the current suggestions once
    Suggestions {
        /// Index universe (nifty_50, nifty_100, nifty_200, nifty_500, all)
        #[arg(short, long)]
        filter: Option<IndexFilter>,

        /// Maximum number of suggestions to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Reconcile with the backend and show tracked positions
    Portfolio,

    /// Track a symbol
    Track {
        symbol: String,

        /// Entry price; defaults to the close in the current suggestions
        #[arg(short, long)]
        price: Option<Decimal>,
    },

    /// Stop tracking a symbol
    Untrack { symbol: String },

    /// Dismiss a symbol's exit alert
    Dismiss { symbol: String },

    /// Lift a dismissal
    Undismiss { symbol: String },

    /// Entry score, exit check, or both for one symbol
    Check {
        symbol: String,

        /// Entry price for the exit check
        #[arg(long)]
        entry_price: Option<Decimal>,

        /// Entry time for the exit check (IST when no offset is given)
        #[arg(long)]
        entry_time: Option<String>,

        /// Run entry and exit checks together
        #[arg(long)]
        combined: bool,
    },

    /// Print the Kite login URL
    LoginUrl,

    /// Check the Kite session
    Session,

    /// Show or change preferences
    Prefs {
        /// Enable or disable exit notifications
        #[arg(long)]
        auto_alert: Option<bool>,

        /// Refresh interval in milliseconds (multiple of 15000)
        #[arg(long)]
        interval: Option<u64>,

        /// Index universe
        #[arg(long)]
        filter: Option<IndexFilter>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    // Load configuration
    let config = Config::from_env()?;
    let dashboard = Arc::new(Dashboard::from_config(config).await?);
    dashboard.restore().await;

    match cli.command {
        Commands::Run => run(dashboard).await?,
        Commands::Suggestions { filter, limit } => show_suggestions(&dashboard, filter, limit).await?,
        Commands::Portfolio => show_portfolio(&dashboard).await?,
        Commands::Track { symbol, price } => track(&dashboard, &symbol, price).await?,
        Commands::Untrack { symbol } => {
            let removed = dashboard.untrack(&symbol).await?;
            println!("{} {}", symbol.to_uppercase().bold(), if removed { "untracked" } else { "was not tracked" });
        }
        Commands::Dismiss { symbol } => {
            dashboard.dismiss(&symbol).await;
            println!("Alert for {} dismissed", symbol.to_uppercase().bold());
        }
        Commands::Undismiss { symbol } => {
            let cleared = dashboard.clear_dismissal(&symbol).await;
            println!(
                "{} {}",
                symbol.to_uppercase().bold(),
                if cleared { "will alert again" } else { "was not dismissed" }
            );
        }
        Commands::Check {
            symbol,
            entry_price,
            entry_time,
            combined,
        } => check(&dashboard, &symbol, entry_price, entry_time, combined).await?,
        Commands::LoginUrl => println!("{}", dashboard.session.login_url().await?),
        Commands::Session => {
            let state = dashboard.session.check_session().await;
            if state.logged_in {
                println!("Kite session: {}", "LOGGED IN".green().bold());
            } else if state.token_expired {
                println!("Kite session: {} - run `swing-watch login-url`", "EXPIRED".red().bold());
            } else {
                println!("Kite session: {}", "LOGGED OUT".yellow().bold());
            }
        }
        Commands::Prefs {
            auto_alert,
            interval,
            filter,
        } => prefs(&dashboard, auto_alert, interval, filter).await?,
    }

    Ok(())
}

async fn run(dashboard: Arc<Dashboard>) -> Result<()> {
    println!("\n{}", "=".repeat(70));
    println!("  SWING WATCH");
    let prefs = dashboard.preferences.get();
    println!(
        "  Filter: {} | Interval: {}s | Auto alert: {}",
        prefs.index_filter,
        prefs.refresh_interval_ms / 1000,
        if prefs.auto_alert_enabled { "ON" } else { "OFF" }
    );
    println!("{}\n", "=".repeat(70));

    dashboard.start().await?;
    let mut alerts_rx = dashboard.alerts.subscribe();
    println!("Watching (Ctrl+C to stop)...\n");

    loop {
        tokio::select! {
            changed = alerts_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let alerts = alerts_rx.borrow_and_update().clone();
                print_alerts(&alerts);
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down...");
                break;
            }
        }
    }

    dashboard.shutdown().await;
    Ok(())
}

async fn show_suggestions(dashboard: &Dashboard, filter: Option<IndexFilter>, limit: usize) -> Result<()> {
    let filter = filter.unwrap_or(dashboard.preferences.get().index_filter);
    let mut suggestions = dashboard.poller.fetch_suggestions(filter).await?;
    suggestions.sort_by(|a, b| b.score.total_cmp(&a.score));

    println!("\n{}", "=".repeat(70));
    println!("  SUGGESTIONS ({}) - {} found", filter, suggestions.len());
    println!("{}\n", "=".repeat(70));

    for s in suggestions.iter().take(limit) {
        print_suggestion(s);
    }
    Ok(())
}

fn print_suggestion(s: &Suggestion) {
    let i = &s.indicators;
    println!(
        "  {:<14} score {:>5.1}  close {:>10.2}  rsi {:>5.1}  macd {:>7.2}  %B {:>5.2}  adx {:>5.1}  {}",
        s.symbol.bold(),
        s.score,
        i.close,
        i.rsi,
        i.macd,
        i.bb,
        i.adx,
        s.category.as_deref().unwrap_or("")
    );
}

async fn show_portfolio(dashboard: &Dashboard) -> Result<()> {
    if let Err(e) = dashboard.portfolio.reconcile().await {
        println!("{} {}", "Using cached portfolio:".yellow(), e.user_message());
    }
    dashboard.poller.refresh_now().await;
    dashboard.evaluate().await;
    let snapshot = dashboard.snapshot().await;
    print_portfolio(&snapshot);
    Ok(())
}

fn print_portfolio(snapshot: &DashboardSnapshot) {
    println!("\n{}", "=".repeat(70));
    println!("  PORTFOLIO - {} positions", snapshot.portfolio.len());
    println!("{}\n", "=".repeat(70));

    for view in &snapshot.portfolio {
        let p = &view.position;
        let pnl = match view.pnl_percent {
            Some(pnl) if pnl.is_sign_negative() => format!("{}%", pnl).red(),
            Some(pnl) => format!("+{}%", pnl).green(),
            None => "n/a".dimmed(),
        };
        let flag = if view.alert {
            "EXIT".red().bold()
        } else if view.dismissed {
            "dismissed".dimmed()
        } else {
            "".normal()
        };
        println!(
            "  {:<14} qty {:>5}  entry {:>10}  stop {:>10}  high {:>10}  {:>8}  {}",
            p.symbol.bold(),
            p.quantity,
            p.entry_price,
            p.stop_loss,
            p.highest_price,
            pnl,
            flag
        );
    }
    println!();
    print_alerts(&snapshot.alerts);
}

fn print_alerts(alerts: &[ExitAlert]) {
    if alerts.is_empty() {
        println!("{}", "No exit alerts".green());
        return;
    }
    for alert in alerts {
        let reasons: Vec<String> = alert.reasons.iter().map(|r| r.describe()).collect();
        println!("  {} {}: {}", "EXIT".red().bold(), alert.symbol.bold(), reasons.join(", "));
    }
}

async fn track(dashboard: &Dashboard, symbol: &str, price: Option<Decimal>) -> Result<()> {
    let outcome = match price {
        Some(price) => dashboard.track_at(symbol, price).await?,
        None => {
            dashboard.poller.refresh_now().await;
            dashboard.track(symbol).await?
        }
    };
    println!("{} {:?}", symbol.to_uppercase().bold(), outcome);
    Ok(())
}

async fn check(
    dashboard: &Dashboard,
    symbol: &str,
    entry_price: Option<Decimal>,
    entry_time: Option<String>,
    combined: bool,
) -> Result<()> {
    let tracked = dashboard.portfolio.get(&symbol.to_uppercase());
    let exit_inputs = match (entry_price.or(tracked.as_ref().map(|p| p.entry_price)), entry_time) {
        (Some(price), Some(raw)) => Some((price, parse_entry_time(&raw)?)),
        (Some(price), None) => tracked.map(|p| (price, p.tracked_at)),
        (None, _) => None,
    };

    match (exit_inputs, combined) {
        (Some((price, time)), true) => {
            let check = dashboard.checker.combined(symbol, price, time).await?;
            println!("{}", serde_json::to_string_pretty(&check)?);
        }
        (Some((price, time)), false) => {
            let check = dashboard.checker.exit_check(symbol, price, time).await?;
            let verdict = if check.is_exit() { "EXIT".red().bold() } else { "HOLD".green().bold() };
            println!(
                "{} {} | P&L {:.2}% over {} days | {}",
                symbol.to_uppercase().bold(),
                verdict,
                check.pnl_percent,
                check.days_held,
                check.exit_reasons.join(", ")
            );
        }
        (None, true) => bail!("combined check needs --entry-price and --entry-time for untracked symbols"),
        (None, false) => {
            let score = dashboard.checker.score(symbol).await?;
            println!(
                "{} score {:.1} {}",
                score.symbol.bold(),
                score.score,
                score.suggestion.as_deref().unwrap_or("")
            );
        }
    }
    Ok(())
}

async fn prefs(
    dashboard: &Dashboard,
    auto_alert: Option<bool>,
    interval: Option<u64>,
    filter: Option<IndexFilter>,
) -> Result<()> {
    let prefs = dashboard
        .update_preferences(PreferencesUpdate {
            auto_alert_enabled: auto_alert,
            refresh_interval_ms: interval,
            index_filter: filter,
        })
        .await?;
    println!("Auto alert:       {}", prefs.auto_alert_enabled);
    println!("Refresh interval: {} ms", prefs.refresh_interval_ms);
    println!("Index filter:     {}", prefs.index_filter);
    Ok(())
}
