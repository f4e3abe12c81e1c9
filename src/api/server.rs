//! Axum server setup and configuration

use crate::api::routes;
use crate::dashboard::{Dashboard, DashboardSnapshot};
use crate::Config;
use anyhow::Result;
use axum::{
    extract::State,
    http::{header, Method},
    routing::{delete, get, post},
    Json, Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub dashboard: Arc<Dashboard>,
}

impl AppState {
    /// Build the dashboard over SQLite and the HTTP backend
    pub async fn new(config: Config) -> Result<Self> {
        let dashboard = Dashboard::from_config(config).await?;
        Ok(Self::from_dashboard(Arc::new(dashboard)))
    }

    pub fn from_dashboard(dashboard: Arc<Dashboard>) -> Self {
        Self { dashboard }
    }
}

/// Create the Axum application with all routes
pub fn create_app(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    // API routes
    let api_routes = Router::new()
        .route("/dashboard", get(dashboard_snapshot))
        // Session routes
        .route("/session", get(routes::session::get_session))
        .route("/session/check", post(routes::session::check_session))
        .route("/session/login-url", get(routes::session::login_url))
        // Suggestion routes
        .route("/suggestions", get(routes::suggestions::list_suggestions))
        .route("/refresh", post(routes::suggestions::refresh))
        // Portfolio routes
        .route(
            "/portfolio",
            get(routes::portfolio::list_portfolio).post(routes::portfolio::track),
        )
        .route("/portfolio/reconcile", post(routes::portfolio::reconcile))
        .route("/portfolio/:symbol", delete(routes::portfolio::untrack))
        .route("/portfolio/:symbol/exit", post(routes::portfolio::trigger_exit))
        .route("/portfolio/:symbol/targets", post(routes::portfolio::record_partial_exit))
        // Alert routes
        .route("/alerts", get(routes::alerts::list_alerts))
        .route(
            "/alerts/:symbol/dismiss",
            post(routes::alerts::dismiss).delete(routes::alerts::clear_dismissal),
        )
        // Preference routes
        .route(
            "/preferences",
            get(routes::preferences::get_preferences).put(routes::preferences::update_preferences),
        )
        // Check routes
        .route("/check/:symbol", get(routes::checks::score))
        .route("/check/:symbol/exit", post(routes::checks::exit_check))
        .route("/check/:symbol/combined", post(routes::checks::combined_check));

    Router::new()
        .nest("/api", api_routes)
        .route("/kite-callback", get(routes::session::kite_callback))
        .route("/health", get(health_check))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /api/dashboard - everything the UI renders
async fn dashboard_snapshot(State(state): State<AppState>) -> Json<DashboardSnapshot> {
    Json(state.dashboard.snapshot().await)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}
