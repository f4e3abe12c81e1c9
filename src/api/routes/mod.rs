//! API route handlers

pub mod alerts;
pub mod checks;
pub mod portfolio;
pub mod preferences;
pub mod session;
pub mod suggestions;

use crate::errors::{ApiError, ErrorKind};
use axum::{http::StatusCode, Json};
use serde::Serialize;

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: ErrorKind,
}

pub type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

/// Map a service error onto an HTTP status with the banner text as body
pub fn error_response(err: ApiError) -> (StatusCode, Json<ErrorResponse>) {
    let status = match &err {
        ApiError::Validation(_) => StatusCode::BAD_REQUEST,
        ApiError::AuthExpired(_) => StatusCode::UNAUTHORIZED,
        ApiError::Network(_) | ApiError::Rejected { .. } | ApiError::Decode(_) => StatusCode::BAD_GATEWAY,
    };
    (
        status,
        Json(ErrorResponse {
            error: err.user_message(),
            kind: err.kind(),
        }),
    )
}
