//! Broker session endpoints

use super::{error_response, ApiResult};
use crate::api::server::AppState;
use crate::services::session::{CallbackParams, SessionStatus};
use crate::types::SessionState;
use axum::{
    extract::{Query, State},
    response::Redirect,
    Json,
};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    #[serde(flatten)]
    pub state: SessionState,
    pub status: SessionStatus,
}

#[derive(Debug, Serialize)]
pub struct LoginUrlResponse {
    pub url: String,
}

/// GET /api/session
pub async fn get_session(State(state): State<AppState>) -> Json<SessionResponse> {
    let session = &state.dashboard.session;
    Json(SessionResponse {
        state: session.state(),
        status: session.status(),
    })
}

/// POST /api/session/check - live session-status query
pub async fn check_session(State(state): State<AppState>) -> Json<SessionResponse> {
    let session = &state.dashboard.session;
    let current = session.check_session().await;
    Json(SessionResponse {
        state: current,
        status: session.status(),
    })
}

/// GET /api/session/login-url
pub async fn login_url(State(state): State<AppState>) -> ApiResult<LoginUrlResponse> {
    let url = state.dashboard.session.login_url().await.map_err(error_response)?;
    Ok(Json(LoginUrlResponse { url }))
}

/// GET /kite-callback - finish the OAuth handshake and go back to the dashboard
pub async fn kite_callback(State(state): State<AppState>, Query(params): Query<CallbackParams>) -> Redirect {
    let outcome = state.dashboard.session.handle_callback(&params).await;
    Redirect::to(&outcome.redirect_to)
}
