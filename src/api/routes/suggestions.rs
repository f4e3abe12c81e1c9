//! Suggestion endpoints

use crate::api::server::AppState;
use crate::services::poller::TickOutcome;
use crate::types::{IndexFilter, Suggestion};
use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct SuggestionsResponse {
    pub suggestions: Vec<Suggestion>,
    pub total: usize,
    pub filter: IndexFilter,
    pub last_updated: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub outcome: &'static str,
    pub count: Option<usize>,
    pub error: Option<String>,
}

impl From<TickOutcome> for RefreshResponse {
    fn from(outcome: TickOutcome) -> Self {
        let (label, count, error) = match outcome {
            TickOutcome::Updated { count } => ("updated", Some(count), None),
            TickOutcome::Gated => ("gated", None, None),
            TickOutcome::SkippedInFlight => ("in_flight", None, None),
            TickOutcome::Stale => ("stale", None, None),
            TickOutcome::Failed(e) => ("failed", None, Some(e.user_message())),
        };
        Self {
            outcome: label,
            count,
            error,
        }
    }
}

/// GET /api/suggestions - current suggestion set
pub async fn list_suggestions(State(state): State<AppState>) -> Json<SuggestionsResponse> {
    let poller = &state.dashboard.poller;
    let suggestions = poller.suggestions().as_ref().clone();
    Json(SuggestionsResponse {
        total: suggestions.len(),
        suggestions,
        filter: poller.params().await.filter,
        last_updated: poller.last_updated().await,
        error: poller.last_error().await.map(|e| e.user_message()),
    })
}

/// POST /api/refresh - fetch now, outside the timer
pub async fn refresh(State(state): State<AppState>) -> Json<RefreshResponse> {
    Json(state.dashboard.refresh().await.into())
}
