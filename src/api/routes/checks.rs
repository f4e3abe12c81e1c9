//! Single-stock check endpoints

use super::{error_response, ApiResult};
use crate::api::server::AppState;
use crate::errors::ApiError;
use crate::services::stock_checker::parse_entry_time;
use crate::types::{CombinedCheck, ExitCheck, ScoreCheck};
use axum::{
    extract::{Path, State},
    Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct ExitCheckBody {
    pub entry_price: Option<Decimal>,
    /// RFC 3339, or exchange-local `YYYY-MM-DD[ HH:MM[:SS]]`
    pub entry_time: Option<String>,
}

/// Resolve entry inputs, falling back to the tracked position
fn entry_inputs(state: &AppState, symbol: &str, body: &ExitCheckBody) -> Result<(Decimal, DateTime<Utc>), ApiError> {
    let tracked = state.dashboard.portfolio.get(&symbol.trim().to_uppercase());

    let price = body
        .entry_price
        .or(tracked.as_ref().map(|p| p.entry_price))
        .ok_or_else(|| ApiError::Validation("entry_price is required for untracked symbols".to_string()))?;

    let time = match &body.entry_time {
        Some(raw) => parse_entry_time(raw)?,
        None => tracked
            .map(|p| p.tracked_at)
            .ok_or_else(|| ApiError::Validation("entry_time is required for untracked symbols".to_string()))?,
    };

    Ok((price, time))
}

/// GET /api/check/:symbol - entry score
pub async fn score(State(state): State<AppState>, Path(symbol): Path<String>) -> ApiResult<ScoreCheck> {
    let check = state.dashboard.checker.score(&symbol).await.map_err(error_response)?;
    Ok(Json(check))
}

/// POST /api/check/:symbol/exit
pub async fn exit_check(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    Json(body): Json<ExitCheckBody>,
) -> ApiResult<ExitCheck> {
    let (price, time) = entry_inputs(&state, &symbol, &body).map_err(error_response)?;
    let check = state
        .dashboard
        .checker
        .exit_check(&symbol, price, time)
        .await
        .map_err(error_response)?;
    Ok(Json(check))
}

/// POST /api/check/:symbol/combined - entry and exit checks together
pub async fn combined_check(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    Json(body): Json<ExitCheckBody>,
) -> ApiResult<CombinedCheck> {
    let (price, time) = entry_inputs(&state, &symbol, &body).map_err(error_response)?;
    let check = state
        .dashboard
        .checker
        .combined(&symbol, price, time)
        .await
        .map_err(error_response)?;
    Ok(Json(check))
}
