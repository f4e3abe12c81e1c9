//! Exit alert endpoints

use crate::api::server::AppState;
use crate::services::exit_alerts::ExitAlert;
use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct AlertsResponse {
    pub alerts: Vec<ExitAlert>,
    pub dismissed: Vec<String>,
    pub notifications_enabled: bool,
}

#[derive(Debug, Serialize)]
pub struct DismissResponse {
    pub symbol: String,
    pub changed: bool,
}

/// GET /api/alerts
pub async fn list_alerts(State(state): State<AppState>) -> Json<AlertsResponse> {
    let alerts = &state.dashboard.alerts;
    Json(AlertsResponse {
        alerts: alerts.current().as_ref().clone(),
        dismissed: alerts.ledger().snapshot().await.into_iter().collect(),
        notifications_enabled: alerts.notifications_enabled(),
    })
}

/// POST /api/alerts/:symbol/dismiss
pub async fn dismiss(State(state): State<AppState>, Path(symbol): Path<String>) -> Json<DismissResponse> {
    let changed = state.dashboard.dismiss(&symbol).await;
    Json(DismissResponse { symbol, changed })
}

/// DELETE /api/alerts/:symbol/dismiss
pub async fn clear_dismissal(State(state): State<AppState>, Path(symbol): Path<String>) -> Json<DismissResponse> {
    let changed = state.dashboard.clear_dismissal(&symbol).await;
    Json(DismissResponse { symbol, changed })
}
