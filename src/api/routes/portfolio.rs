//! Portfolio endpoints

use super::{error_response, ApiResult};
use crate::api::server::AppState;
use crate::dashboard::PositionView;
use crate::services::portfolio::TrackOutcome;
use axum::{
    extract::{Path, State},
    Json,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct TrackRequest {
    pub symbol: String,
    /// Entry price; defaults to the symbol's close in the current suggestions
    pub price: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
pub struct PartialExitRequest {
    pub target: u32,
}

#[derive(Debug, Serialize)]
pub struct PortfolioResponse {
    pub positions: Vec<PositionView>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct TrackResponse {
    pub symbol: String,
    pub outcome: TrackOutcome,
}

#[derive(Debug, Serialize)]
pub struct ChangedResponse {
    pub symbol: String,
    pub changed: bool,
}

/// GET /api/portfolio
pub async fn list_portfolio(State(state): State<AppState>) -> Json<PortfolioResponse> {
    let positions = state.dashboard.snapshot().await.portfolio;
    Json(PortfolioResponse {
        total: positions.len(),
        positions,
    })
}

/// POST /api/portfolio - track a symbol
pub async fn track(State(state): State<AppState>, Json(request): Json<TrackRequest>) -> ApiResult<TrackResponse> {
    let outcome = match request.price {
        Some(price) => state.dashboard.track_at(&request.symbol, price).await,
        None => state.dashboard.track(&request.symbol).await,
    }
    .map_err(error_response)?;

    Ok(Json(TrackResponse {
        symbol: request.symbol.trim().to_uppercase(),
        outcome,
    }))
}

/// DELETE /api/portfolio/:symbol
pub async fn untrack(State(state): State<AppState>, Path(symbol): Path<String>) -> ApiResult<ChangedResponse> {
    let changed = state.dashboard.untrack(&symbol).await.map_err(error_response)?;
    Ok(Json(ChangedResponse { symbol, changed }))
}

/// POST /api/portfolio/:symbol/exit
pub async fn trigger_exit(State(state): State<AppState>, Path(symbol): Path<String>) -> ApiResult<ChangedResponse> {
    state
        .dashboard
        .portfolio
        .trigger_exit(&symbol)
        .await
        .map_err(error_response)?;
    Ok(Json(ChangedResponse { symbol, changed: true }))
}

/// POST /api/portfolio/:symbol/targets - record a partial exit
pub async fn record_partial_exit(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    Json(request): Json<PartialExitRequest>,
) -> ApiResult<ChangedResponse> {
    let changed = state
        .dashboard
        .portfolio
        .record_partial_exit(&symbol, request.target)
        .await
        .map_err(error_response)?;
    Ok(Json(ChangedResponse { symbol, changed }))
}

/// POST /api/portfolio/reconcile - replace local positions with the backend's
pub async fn reconcile(State(state): State<AppState>) -> ApiResult<PortfolioResponse> {
    state.dashboard.portfolio.reconcile().await.map_err(error_response)?;
    state.dashboard.evaluate().await;
    Ok(list_portfolio(State(state)).await)
}
