//! Backend API error classification
//!
//! Maps raw HTTP failures from the scoring backend into the four failure
//! classes the dashboard reacts to: transient network trouble, an expired
//! broker session, locally rejected input, and backend rejections.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured backend error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// Request never produced a response (timeout, DNS, refused)
    #[error("network error: {0}")]
    Network(String),
    /// HTTP 401 or a body naming a token problem
    #[error("broker session expired: {0}")]
    AuthExpired(String),
    /// Rejected locally before any network call
    #[error("invalid input: {0}")]
    Validation(String),
    /// Non-2xx answer to a request
    #[error("backend rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },
    /// 2xx answer whose body could not be read
    #[error("malformed backend response: {0}")]
    Decode(String),
}

/// Coarse failure class used for banners and HTTP status mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    TransientNetwork,
    AuthExpired,
    Validation,
    BackendRejection,
}

/// Error body shapes the backend produces (FastAPI `detail`, custom `reason`)
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    detail: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl ApiError {
    /// Classify a non-success HTTP response
    pub fn from_response(status: u16, body: &str) -> Self {
        let message = extract_message(body);

        if status == 401 {
            return ApiError::AuthExpired(message.unwrap_or_else(|| "unauthorized".to_string()));
        }

        if let Some(msg) = message.as_deref() {
            if mentions_token(msg) {
                return ApiError::AuthExpired(msg.to_string());
            }
        }

        ApiError::Rejected {
            status,
            body: message.unwrap_or_else(|| body.to_string()),
        }
    }

    /// Detect a token failure carried inside an otherwise successful body
    pub fn from_success_body(body: &serde_json::Value) -> Option<Self> {
        let reason = body.get("reason").and_then(|r| r.as_str())?;
        mentions_token(reason).then(|| ApiError::AuthExpired(reason.to_string()))
    }

    /// Parse a reqwest transport error
    pub fn from_network_error(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Network("request timed out".to_string())
        } else if err.is_connect() {
            ApiError::Network("connection failed".to_string())
        } else if err.is_decode() {
            ApiError::Decode(err.to_string())
        } else {
            ApiError::Network(err.to_string())
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::Network(_) => ErrorKind::TransientNetwork,
            ApiError::AuthExpired(_) => ErrorKind::AuthExpired,
            ApiError::Validation(_) => ErrorKind::Validation,
            ApiError::Rejected { .. } | ApiError::Decode(_) => ErrorKind::BackendRejection,
        }
    }

    pub fn is_auth_expired(&self) -> bool {
        matches!(self, ApiError::AuthExpired(_))
    }

    /// Status code of a backend rejection
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Banner text for the dashboard
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Network(msg) => format!("Could not reach the backend ({}). Will retry on the next refresh.", msg),
            ApiError::AuthExpired(_) => "Your Kite session has expired. Please login to Kite again.".to_string(),
            ApiError::Validation(msg) => msg.clone(),
            ApiError::Rejected { status, body } => format!("Backend error {}: {}", status, body),
            ApiError::Decode(_) => "The backend returned an unreadable response.".to_string(),
        }
    }
}

fn mentions_token(msg: &str) -> bool {
    msg.to_lowercase().contains("token")
}

fn extract_message(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }

    let Ok(parsed) = serde_json::from_str::<ErrorBody>(trimmed) else {
        return Some(trimmed.to_string());
    };

    let detail = parsed.detail.map(|d| match d {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    });

    parsed
        .reason
        .or(detail)
        .or(parsed.error)
        .or(parsed.message)
        .or_else(|| Some(trimmed.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unauthorized_is_auth_expired() {
        let err = ApiError::from_response(401, "");
        assert!(err.is_auth_expired());
        assert_eq!(err.kind(), ErrorKind::AuthExpired);
    }

    #[test]
    fn test_token_reason_is_auth_expired() {
        let err = ApiError::from_response(500, r#"{"reason":"Incorrect `api_key` or `access_token`."}"#);
        assert!(err.is_auth_expired());

        let err = ApiError::from_response(403, r#"{"detail":"TokenException: token expired"}"#);
        assert!(err.is_auth_expired());
    }

    #[test]
    fn test_plain_failure_is_rejection() {
        let err = ApiError::from_response(500, "Internal Server Error");
        assert_eq!(err.kind(), ErrorKind::BackendRejection);
        assert_eq!(err.status(), Some(500));
        assert!(!err.is_auth_expired());
    }

    #[test]
    fn test_detail_message_is_extracted() {
        let err = ApiError::from_response(400, r#"{"detail":"Stock already exists in portfolio"}"#);
        assert_eq!(
            err,
            ApiError::Rejected {
                status: 400,
                body: "Stock already exists in portfolio".to_string()
            }
        );
    }

    #[test]
    fn test_success_body_with_token_reason() {
        let body = serde_json::json!({"reason": "access token invalid"});
        assert!(ApiError::from_success_body(&body).is_some_and(|e| e.is_auth_expired()));
        assert!(ApiError::from_success_body(&serde_json::json!([])).is_none());
    }
}
