//! Single-stock entry and exit checks
//!
//! The combined check issues both requests concurrently and fails as a
//! whole if either side fails.

use crate::client::{price_to_f64, Backend, ExitCheckRequest};
use crate::errors::ApiError;
use crate::services::portfolio::normalize_symbol;
use crate::services::session::SessionManager;
use crate::types::{CombinedCheck, ExitCheck, ScoreCheck};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Asia::Kolkata;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, warn};

const LOCAL_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

/// Parse an entry time. Inputs without an offset are exchange time (IST).
pub fn parse_entry_time(input: &str) -> Result<DateTime<Utc>, ApiError> {
    let input = input.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(input) {
        return Ok(parsed.with_timezone(&Utc));
    }

    let naive = LOCAL_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(input, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(input, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .ok_or_else(|| ApiError::Validation(format!("'{}' is not a valid entry time", input)))?;

    Kolkata
        .from_local_datetime(&naive)
        .single()
        .map(|t| t.with_timezone(&Utc))
        .ok_or_else(|| ApiError::Validation(format!("'{}' is ambiguous in IST", input)))
}

pub struct StockChecker {
    backend: Arc<dyn Backend>,
    session: Arc<SessionManager>,
}

impl StockChecker {
    pub fn new(backend: Arc<dyn Backend>, session: Arc<SessionManager>) -> Self {
        Self { backend, session }
    }

    async fn observe<T>(&self, what: &str, result: Result<T, ApiError>) -> Result<T, ApiError> {
        if let Err(e) = &result {
            if !self.session.handle_failure(e).await {
                warn!("{} failed: {}", what, e);
            }
        }
        result
    }

    /// Entry check: current score for `symbol`
    pub async fn score(&self, symbol: &str) -> Result<ScoreCheck, ApiError> {
        let symbol = normalize_symbol(symbol)?;
        let result = self.backend.stock_score(&symbol).await;
        self.observe("Score check", result).await
    }

    /// Exit check for a holding bought at `entry_price` on `entry_time`
    pub async fn exit_check(
        &self,
        symbol: &str,
        entry_price: Decimal,
        entry_time: DateTime<Utc>,
    ) -> Result<ExitCheck, ApiError> {
        let request = exit_request(symbol, entry_price, entry_time)?;
        let result = self.backend.check_exit(&request).await;
        self.observe("Exit check", result).await
    }

    /// Entry and exit checks joined; either failure fails the whole check
    pub async fn combined(
        &self,
        symbol: &str,
        entry_price: Decimal,
        entry_time: DateTime<Utc>,
    ) -> Result<CombinedCheck, ApiError> {
        let request = exit_request(symbol, entry_price, entry_time)?;
        debug!("Combined check for {}", request.symbol);

        let result = futures::try_join!(
            self.backend.stock_score(&request.symbol),
            self.backend.check_exit(&request)
        )
        .map(|(entry, exit)| CombinedCheck { entry, exit });
        self.observe("Combined check", result).await
    }
}

fn exit_request(symbol: &str, entry_price: Decimal, entry_time: DateTime<Utc>) -> Result<ExitCheckRequest, ApiError> {
    let symbol = normalize_symbol(symbol)?;
    if entry_price <= Decimal::ZERO {
        return Err(ApiError::Validation("entry price must be positive".to_string()));
    }
    if entry_time > Utc::now() {
        return Err(ApiError::Validation("entry time is in the future".to_string()));
    }
    Ok(ExitCheckRequest {
        symbol,
        entry_price: price_to_f64(entry_price),
        entry_time,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::persistence::Persistence;
    use crate::services::session::{LoginSettings, SessionStatus};
    use crate::testing::MockBackend;
    use rust_decimal_macros::dec;

    fn checker(backend: Arc<MockBackend>) -> (StockChecker, Arc<SessionManager>) {
        let session = Arc::new(SessionManager::new(
            backend.clone(),
            Persistence::in_memory(),
            LoginSettings::default(),
        ));
        (StockChecker::new(backend, session.clone()), session)
    }

    fn entry_time() -> DateTime<Utc> {
        parse_entry_time("2024-05-02 09:30").unwrap()
    }

    #[test]
    fn test_parse_entry_time_defaults_to_ist() {
        let t = parse_entry_time("2024-05-02T09:30").unwrap();
        assert_eq!(t.to_rfc3339(), "2024-05-02T04:00:00+00:00");

        let explicit = parse_entry_time("2024-05-02T09:30:00Z").unwrap();
        assert_eq!(explicit.to_rfc3339(), "2024-05-02T09:30:00+00:00");

        let day = parse_entry_time("2024-05-02").unwrap();
        assert_eq!(day.to_rfc3339(), "2024-05-01T18:30:00+00:00");

        assert!(matches!(parse_entry_time("yesterday"), Err(ApiError::Validation(_))));
    }

    #[tokio::test]
    async fn test_combined_check_joins_both_sides() {
        let backend = Arc::new(MockBackend::new());
        let (checker, _) = checker(backend.clone());

        let check = checker.combined("infy", dec!(100), entry_time()).await.unwrap();
        assert_eq!(check.entry.symbol, "INFY");
        assert!(check.exit.is_exit());
        assert_eq!(backend.call_count("stock_score").await, 1);
        assert_eq!(backend.call_count("check_exit").await, 1);
    }

    #[tokio::test]
    async fn test_combined_check_fails_if_either_side_fails() {
        let backend = Arc::new(MockBackend::new());
        backend
            .fail_next("check_exit", ApiError::Network("reset".to_string()))
            .await;
        let (checker, _) = checker(backend);

        let err = checker.combined("INFY", dec!(100), entry_time()).await.unwrap_err();
        assert!(matches!(err, ApiError::Network(_)));
    }

    #[tokio::test]
    async fn test_auth_failure_expires_session() {
        let backend = Arc::new(MockBackend::new());
        backend
            .fail_next("stock_score", ApiError::AuthExpired("token expired".to_string()))
            .await;
        let (checker, session) = checker(backend);

        assert!(checker.score("TCS").await.unwrap_err().is_auth_expired());
        assert_eq!(session.status(), SessionStatus::Expired);
    }

    #[tokio::test]
    async fn test_invalid_exit_input_never_reaches_backend() {
        let backend = Arc::new(MockBackend::new());
        let (checker, _) = checker(backend.clone());

        assert!(checker.exit_check("TCS", dec!(0), entry_time()).await.is_err());
        let future = Utc::now() + chrono::Duration::days(2);
        assert!(checker.exit_check("TCS", dec!(10), future).await.is_err());
        assert_eq!(backend.call_count("check_exit").await, 0);
    }
}
