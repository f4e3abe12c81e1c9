//! HTTP client for the scoring/portfolio backend
//!
//! Every endpoint the tracker consumes lives behind the [`Backend`] trait so
//! that the session, poller, portfolio and alert components can be driven by
//! a scripted backend in tests.

use crate::config::Config;
use crate::errors::ApiError;
use crate::types::{ExitCheck, IndexFilter, Position, ScoreCheck, Suggestion};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{header, redirect, Client, Response};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Portfolio record as stored by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendPosition {
    pub symbol: String,
    pub close: f64,
    #[serde(default)]
    pub quantity: Option<u32>,
    #[serde(default)]
    pub sold_targets: Option<Vec<u32>>,
    #[serde(default)]
    pub highest_price: Option<f64>,
}

impl BackendPosition {
    pub fn from_position(position: &Position) -> Self {
        Self {
            symbol: position.symbol.clone(),
            close: position.entry_price.to_f64().unwrap_or_default(),
            quantity: Some(position.quantity),
            sold_targets: Some(position.sold_targets.clone()),
            highest_price: position.highest_price.to_f64(),
        }
    }
}

/// Body of `POST /api/portfolio`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewPosition {
    pub symbol: String,
    pub close: f64,
    pub quantity: u32,
}

/// Body of `POST /api/check-exit`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExitCheckRequest {
    pub symbol: String,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct SessionStatusResponse {
    logged_in: bool,
}

#[derive(Debug, Deserialize)]
struct LoginUrlResponse {
    url: String,
}

/// Consumed backend endpoints
#[async_trait]
pub trait Backend: Send + Sync {
    /// `GET /api/short-term-suggestions?interval=day&index={filter}`
    async fn fetch_suggestions(&self, filter: IndexFilter) -> Result<Vec<Suggestion>, ApiError>;

    /// `GET /api/portfolio`
    async fn fetch_portfolio(&self) -> Result<Vec<BackendPosition>, ApiError>;

    /// `POST /api/portfolio`
    async fn add_position(&self, position: &NewPosition) -> Result<(), ApiError>;

    /// `PUT /api/portfolio`
    async fn update_position(&self, position: &BackendPosition) -> Result<(), ApiError>;

    /// `DELETE /api/portfolio/{symbol}`
    async fn remove_position(&self, symbol: &str) -> Result<(), ApiError>;

    /// `POST /api/exit`
    async fn trigger_exit(&self, symbol: &str) -> Result<(), ApiError>;

    /// `GET /api/stock-score/{symbol}`
    async fn stock_score(&self, symbol: &str) -> Result<ScoreCheck, ApiError>;

    /// `POST /api/check-exit`
    async fn check_exit(&self, request: &ExitCheckRequest) -> Result<ExitCheck, ApiError>;

    /// `GET /api/kite/session-status`
    async fn session_status(&self) -> Result<bool, ApiError>;

    /// `GET /api/kite/login-url`
    async fn login_url(&self) -> Result<String, ApiError>;

    /// `GET /kite-callback?request_token&status`, exchanging the request token
    async fn complete_login(&self, request_token: &str, status: &str) -> Result<(), ApiError>;

    /// `POST /api/send-exit-email`
    async fn send_exit_email(&self, symbol: &str, price: Option<f64>) -> Result<(), ApiError>;
}

/// reqwest-backed [`Backend`]
#[derive(Clone)]
pub struct BackendClient {
    client: Client,
    /// Callback exchange answers with a redirect we must read, not follow
    no_redirect: Client,
    base_url: String,
}

impl BackendClient {
    pub fn new(config: &Config) -> Self {
        Self::with_base_url(&config.backend_url, Duration::from_secs(config.http_timeout_secs))
    }

    pub fn with_base_url(base_url: &str, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");

        let no_redirect = Client::builder()
            .timeout(timeout)
            .redirect(redirect::Policy::none())
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            no_redirect,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn symbol_path(&self, prefix: &str, symbol: &str) -> String {
        self.url(&format!("{}/{}", prefix, urlencoding::encode(symbol)))
    }

    /// Turn a non-success response into an [`ApiError`]
    async fn check(response: Response) -> Result<Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ApiError::from_response(status.as_u16(), &body))
    }

    async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
        let response = Self::check(response).await?;
        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))?;

        if let Some(err) = ApiError::from_success_body(&value) {
            return Err(err);
        }

        serde_json::from_value(value).map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Response, ApiError> {
        request.send().await.map_err(|e| ApiError::from_network_error(&e))
    }
}

#[async_trait]
impl Backend for BackendClient {
    async fn fetch_suggestions(&self, filter: IndexFilter) -> Result<Vec<Suggestion>, ApiError> {
        let url = self.url("/api/short-term-suggestions");
        debug!("Fetching suggestions from: {} (index={})", url, filter);

        let response = self
            .send(self.client.get(&url).query(&[("interval", "day"), ("index", filter.as_str())]))
            .await?;
        let response = Self::check(response).await?;
        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))?;

        if let Some(err) = ApiError::from_success_body(&value) {
            return Err(err);
        }

        // A non-list body is an empty result, not an error
        if !value.is_array() {
            debug!("Suggestion endpoint returned a non-list body, treating as empty");
            return Ok(Vec::new());
        }

        serde_json::from_value(value).map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn fetch_portfolio(&self) -> Result<Vec<BackendPosition>, ApiError> {
        let response = self.send(self.client.get(self.url("/api/portfolio"))).await?;
        Self::read_json(response).await
    }

    async fn add_position(&self, position: &NewPosition) -> Result<(), ApiError> {
        let response = self
            .send(self.client.post(self.url("/api/portfolio")).json(position))
            .await?;
        Self::check(response).await.map(|_| ())
    }

    async fn update_position(&self, position: &BackendPosition) -> Result<(), ApiError> {
        let response = self
            .send(self.client.put(self.url("/api/portfolio")).json(position))
            .await?;
        Self::check(response).await.map(|_| ())
    }

    async fn remove_position(&self, symbol: &str) -> Result<(), ApiError> {
        let response = self
            .send(self.client.delete(self.symbol_path("/api/portfolio", symbol)))
            .await?;
        Self::check(response).await.map(|_| ())
    }

    async fn trigger_exit(&self, symbol: &str) -> Result<(), ApiError> {
        let response = self
            .send(
                self.client
                    .post(self.url("/api/exit"))
                    .json(&serde_json::json!({ "symbol": symbol })),
            )
            .await?;
        Self::check(response).await.map(|_| ())
    }

    async fn stock_score(&self, symbol: &str) -> Result<ScoreCheck, ApiError> {
        let response = self
            .send(self.client.get(self.symbol_path("/api/stock-score", symbol)))
            .await?;
        Self::read_json(response).await
    }

    async fn check_exit(&self, request: &ExitCheckRequest) -> Result<ExitCheck, ApiError> {
        let response = self
            .send(self.client.post(self.url("/api/check-exit")).json(request))
            .await?;
        Self::read_json(response).await
    }

    async fn session_status(&self) -> Result<bool, ApiError> {
        let response = self
            .send(self.client.get(self.url("/api/kite/session-status")))
            .await?;
        let status: SessionStatusResponse = Self::read_json(response).await?;
        Ok(status.logged_in)
    }

    async fn login_url(&self) -> Result<String, ApiError> {
        let response = self.send(self.client.get(self.url("/api/kite/login-url"))).await?;
        let body: LoginUrlResponse = Self::read_json(response).await?;
        Ok(body.url)
    }

    async fn complete_login(&self, request_token: &str, status: &str) -> Result<(), ApiError> {
        let response = self
            .send(
                self.no_redirect
                    .get(self.url("/kite-callback"))
                    .query(&[("request_token", request_token), ("status", status)]),
            )
            .await?;

        let code = response.status();
        if code.is_redirection() {
            let location = response
                .headers()
                .get(header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();
            debug!("Login exchange redirected to {}", location);

            if location.contains("kite_login=success") {
                return Ok(());
            }
            return Err(ApiError::Rejected {
                status: code.as_u16(),
                body: format!("login exchange failed (redirect to {})", location),
            });
        }

        Self::check(response).await.map(|_| ())
    }

    async fn send_exit_email(&self, symbol: &str, price: Option<f64>) -> Result<(), ApiError> {
        let response = self
            .send(
                self.client
                    .post(self.url("/api/send-exit-email"))
                    .json(&serde_json::json!({ "symbol": symbol, "price": price })),
            )
            .await?;
        Self::check(response).await.map(|_| ())
    }
}

/// Helper for converting a decimal price to the backend's float wire format
pub fn price_to_f64(price: Decimal) -> f64 {
    price.to_f64().unwrap_or_default()
}
