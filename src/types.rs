//! Core types for the swing watch-list tracker

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Index universe the suggestion backend screens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum IndexFilter {
    #[default]
    #[serde(rename = "nifty_50")]
    Nifty50,
    #[serde(rename = "nifty_100")]
    Nifty100,
    #[serde(rename = "nifty_200")]
    Nifty200,
    #[serde(rename = "nifty_500")]
    Nifty500,
    #[serde(rename = "all")]
    All,
}

impl IndexFilter {
    pub const ALL: [IndexFilter; 5] = [
        IndexFilter::Nifty50,
        IndexFilter::Nifty100,
        IndexFilter::Nifty200,
        IndexFilter::Nifty500,
        IndexFilter::All,
    ];

    /// Query-string value expected by the suggestion endpoint
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexFilter::Nifty50 => "nifty_50",
            IndexFilter::Nifty100 => "nifty_100",
            IndexFilter::Nifty200 => "nifty_200",
            IndexFilter::Nifty500 => "nifty_500",
            IndexFilter::All => "all",
        }
    }
}

impl fmt::Display for IndexFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for IndexFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        IndexFilter::ALL
            .into_iter()
            .find(|f| f.as_str() == normalized)
            .ok_or_else(|| format!("unknown index filter '{}'", s))
    }
}

fn nan() -> f64 {
    f64::NAN
}

/// Accepts `null` (pandas NaN) as a missing reading
fn nullable_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
}

/// Pre-computed indicator readings for one symbol.
///
/// Missing readings are NaN so that no threshold comparison fires on them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    #[serde(default = "nan", deserialize_with = "nullable_f64")]
    pub adx: f64,
    #[serde(default = "nan", deserialize_with = "nullable_f64")]
    pub dmp: f64,
    #[serde(default = "nan", deserialize_with = "nullable_f64")]
    pub dmn: f64,
    #[serde(default = "nan", deserialize_with = "nullable_f64")]
    pub rsi: f64,
    #[serde(default = "nan", deserialize_with = "nullable_f64")]
    pub macd: f64,
    #[serde(default = "nan", deserialize_with = "nullable_f64")]
    pub macd_signal: f64,
    /// Bollinger %B
    #[serde(default = "nan", deserialize_with = "nullable_f64")]
    pub bb: f64,
    #[serde(default = "nan", deserialize_with = "nullable_f64")]
    pub obv: f64,
    #[serde(default = "nan", deserialize_with = "nullable_f64")]
    pub atr: f64,
    #[serde(default = "nan", deserialize_with = "nullable_f64")]
    pub volume: f64,
    #[serde(default = "nan", deserialize_with = "nullable_f64")]
    pub close: f64,
}

impl Default for IndicatorSnapshot {
    fn default() -> Self {
        Self {
            adx: f64::NAN,
            dmp: f64::NAN,
            dmn: f64::NAN,
            rsi: f64::NAN,
            macd: f64::NAN,
            macd_signal: f64::NAN,
            bb: f64::NAN,
            obv: f64::NAN,
            atr: f64::NAN,
            volume: f64::NAN,
            close: f64::NAN,
        }
    }
}

/// A screened candidate returned by the suggestion backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub symbol: String,
    #[serde(flatten)]
    pub indicators: IndicatorSnapshot,
    /// Composite score from the scoring service
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub category: Option<String>,
}

impl Suggestion {
    /// Close as a decimal price, if it is a finite positive number
    pub fn close_price(&self) -> Option<Decimal> {
        let close = self.indicators.close;
        if !close.is_finite() || close <= 0.0 {
            return None;
        }
        Decimal::try_from(close).ok().map(|d| d.round_dp(2))
    }
}

/// A tracked holding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    /// Close at track time
    pub entry_price: Decimal,
    pub quantity: u32,
    pub stop_loss: Decimal,
    pub highest_price: Decimal,
    /// Partial-exit targets already realized
    #[serde(default)]
    pub sold_targets: Vec<u32>,
    #[serde(default = "Utc::now")]
    pub tracked_at: DateTime<Utc>,
}

impl Position {
    /// Build a position from an entry close, placing the stop `stop_loss_pct` under it
    pub fn open(symbol: &str, entry_price: Decimal, quantity: u32, stop_loss_pct: Decimal) -> Self {
        Self {
            symbol: symbol.to_string(),
            entry_price,
            quantity,
            stop_loss: (entry_price * (Decimal::ONE - stop_loss_pct)).round_dp(2),
            highest_price: entry_price,
            sold_targets: Vec::new(),
            tracked_at: Utc::now(),
        }
    }

    /// Raise the highest price seen. Returns true if it moved.
    pub fn observe_price(&mut self, price: Decimal) -> bool {
        if price > self.highest_price {
            self.highest_price = price;
            true
        } else {
            false
        }
    }

    /// Unrealized P&L percent against `price`
    pub fn pnl_percent(&self, price: Decimal) -> Decimal {
        if self.entry_price.is_zero() {
            return Decimal::ZERO;
        }
        ((price - self.entry_price) / self.entry_price * Decimal::from(100)).round_dp(2)
    }
}

/// Entry check result from `GET /api/stock-score/{symbol}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreCheck {
    pub symbol: String,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub suggestion: Option<String>,
    #[serde(default = "nan", deserialize_with = "nullable_f64")]
    pub close: f64,
    #[serde(default = "nan", deserialize_with = "nullable_f64")]
    pub volume: f64,
}

/// Exit check result from `POST /api/check-exit`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitCheck {
    pub entry_price: f64,
    pub current_price: f64,
    pub pnl_percent: f64,
    pub days_held: i64,
    /// "EXIT" or "HOLD"
    pub recommendation: String,
    #[serde(default)]
    pub exit_reasons: Vec<String>,
}

impl ExitCheck {
    pub fn is_exit(&self) -> bool {
        self.recommendation.eq_ignore_ascii_case("exit")
    }
}

/// Entry and exit checks joined for one symbol
#[derive(Debug, Clone, Serialize)]
pub struct CombinedCheck {
    pub entry: ScoreCheck,
    pub exit: ExitCheck,
}

/// UI-facing view of the broker session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionState {
    pub logged_in: bool,
    pub token_expired: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_index_filter_wire_names() {
        assert_eq!(serde_json::to_string(&IndexFilter::Nifty200).unwrap(), "\"nifty_200\"");
        assert_eq!("NIFTY-500".parse::<IndexFilter>().unwrap(), IndexFilter::Nifty500);
        assert!("sensex".parse::<IndexFilter>().is_err());
    }

    #[test]
    fn test_suggestion_tolerates_null_and_missing_indicators() {
        let s: Suggestion = serde_json::from_str(
            r#"{"symbol":"INFY","adx":null,"rsi":55.2,"macd":-0.4,"bb":0.5,"close":1500.25,"score":7}"#,
        )
        .unwrap();
        assert!(s.indicators.adx.is_nan());
        assert!(s.indicators.atr.is_nan());
        assert_eq!(s.indicators.rsi, 55.2);
        assert_eq!(s.score, 7.0);
        assert_eq!(s.close_price(), Some(dec!(1500.25)));
    }

    #[test]
    fn test_position_open_places_stop_under_entry() {
        let p = Position::open("TCS", dec!(100), 100, dec!(0.03));
        assert_eq!(p.stop_loss, dec!(97.00));
        assert_eq!(p.highest_price, dec!(100));
        assert!(p.sold_targets.is_empty());
    }

    #[test]
    fn test_observe_price_only_raises() {
        let mut p = Position::open("TCS", dec!(100), 100, dec!(0.03));
        assert!(p.observe_price(dec!(104.5)));
        assert!(!p.observe_price(dec!(102)));
        assert_eq!(p.highest_price, dec!(104.5));
        assert_eq!(p.pnl_percent(dec!(110)), dec!(10));
    }
}
