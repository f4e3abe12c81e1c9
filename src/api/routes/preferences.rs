//! Preference endpoints

use super::{error_response, ApiResult};
use crate::api::server::AppState;
use crate::services::preferences::{Preferences, PreferencesUpdate};
use axum::{extract::State, Json};

/// GET /api/preferences
pub async fn get_preferences(State(state): State<AppState>) -> Json<Preferences> {
    Json(state.dashboard.preferences.get())
}

/// PUT /api/preferences
pub async fn update_preferences(
    State(state): State<AppState>,
    Json(update): Json<PreferencesUpdate>,
) -> ApiResult<Preferences> {
    state
        .dashboard
        .update_preferences(update)
        .await
        .map(Json)
        .map_err(error_response)
}
