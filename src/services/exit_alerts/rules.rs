//! Exit rule set
//!
//! A position needs attention when any rule holds on its current snapshot.
//! All comparisons are strict except the stop-loss, which fires at equality.
//! NaN readings never satisfy a rule.

use crate::types::IndicatorSnapshot;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Rule thresholds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExitThresholds {
    /// MACD under this is bearish momentum
    pub macd_floor: f64,
    pub rsi_floor: f64,
    pub rsi_ceiling: f64,
    /// Bollinger %B band edges
    pub percent_b_floor: f64,
    pub percent_b_ceiling: f64,
    /// ADX under this is a weak trend
    pub adx_floor: f64,
}

impl Default for ExitThresholds {
    fn default() -> Self {
        Self {
            macd_floor: 0.0,
            rsi_floor: 40.0,
            rsi_ceiling: 75.0,
            percent_b_floor: 0.1,
            percent_b_ceiling: 0.9,
            adx_floor: 20.0,
        }
    }
}

/// Why a position was flagged
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum ExitReason {
    MacdNegative { macd: f64, floor: f64 },
    RsiOversold { rsi: f64, floor: f64 },
    RsiOverbought { rsi: f64, ceiling: f64 },
    BelowLowerBand { percent_b: f64, floor: f64 },
    AboveUpperBand { percent_b: f64, ceiling: f64 },
    WeakTrend { adx: f64, floor: f64 },
    StopLossHit { close: Decimal, stop_loss: Decimal },
}

impl ExitReason {
    /// Short machine name
    pub fn rule_name(&self) -> &'static str {
        match self {
            ExitReason::MacdNegative { .. } => "macd_negative",
            ExitReason::RsiOversold { .. } => "rsi_oversold",
            ExitReason::RsiOverbought { .. } => "rsi_overbought",
            ExitReason::BelowLowerBand { .. } => "below_lower_band",
            ExitReason::AboveUpperBand { .. } => "above_upper_band",
            ExitReason::WeakTrend { .. } => "weak_trend",
            ExitReason::StopLossHit { .. } => "stop_loss_hit",
        }
    }

    pub fn describe(&self) -> String {
        match self {
            ExitReason::MacdNegative { macd, floor } => format!("MACD {:.2} below {}", macd, floor),
            ExitReason::RsiOversold { rsi, floor } => format!("RSI {:.1} below {}", rsi, floor),
            ExitReason::RsiOverbought { rsi, ceiling } => format!("RSI {:.1} above {}", rsi, ceiling),
            ExitReason::BelowLowerBand { percent_b, floor } => format!("%B {:.2} below {}", percent_b, floor),
            ExitReason::AboveUpperBand { percent_b, ceiling } => {
                format!("%B {:.2} above {}", percent_b, ceiling)
            }
            ExitReason::WeakTrend { adx, floor } => format!("ADX {:.1} below {}", adx, floor),
            ExitReason::StopLossHit { close, stop_loss } => {
                format!("close {} at or under stop-loss {}", close, stop_loss)
            }
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.describe())
    }
}

impl ExitThresholds {
    /// Every rule that holds for `snapshot` against `stop_loss`
    pub fn reasons(&self, snapshot: &IndicatorSnapshot, stop_loss: Decimal) -> Vec<ExitReason> {
        let mut reasons = Vec::new();

        if snapshot.macd < self.macd_floor {
            reasons.push(ExitReason::MacdNegative {
                macd: snapshot.macd,
                floor: self.macd_floor,
            });
        }
        if snapshot.rsi < self.rsi_floor {
            reasons.push(ExitReason::RsiOversold {
                rsi: snapshot.rsi,
                floor: self.rsi_floor,
            });
        }
        if snapshot.rsi > self.rsi_ceiling {
            reasons.push(ExitReason::RsiOverbought {
                rsi: snapshot.rsi,
                ceiling: self.rsi_ceiling,
            });
        }
        if snapshot.bb < self.percent_b_floor {
            reasons.push(ExitReason::BelowLowerBand {
                percent_b: snapshot.bb,
                floor: self.percent_b_floor,
            });
        }
        if snapshot.bb > self.percent_b_ceiling {
            reasons.push(ExitReason::AboveUpperBand {
                percent_b: snapshot.bb,
                ceiling: self.percent_b_ceiling,
            });
        }
        if snapshot.adx < self.adx_floor {
            reasons.push(ExitReason::WeakTrend {
                adx: snapshot.adx,
                floor: self.adx_floor,
            });
        }
        if let Some(close) = decimal_close(snapshot.close) {
            if close <= stop_loss {
                reasons.push(ExitReason::StopLossHit { close, stop_loss });
            }
        }

        reasons
    }

    /// True if any rule holds
    pub fn requires_exit(&self, snapshot: &IndicatorSnapshot, stop_loss: Decimal) -> bool {
        !self.reasons(snapshot, stop_loss).is_empty()
    }
}

fn decimal_close(close: f64) -> Option<Decimal> {
    if !close.is_finite() {
        return None;
    }
    Decimal::try_from(close).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn snapshot(macd: f64, rsi: f64, bb: f64, adx: f64, close: f64) -> IndicatorSnapshot {
        IndicatorSnapshot {
            macd,
            rsi,
            bb,
            adx,
            close,
            ..IndicatorSnapshot::default()
        }
    }

    #[test]
    fn test_negative_macd_alone_triggers() {
        let rules = ExitThresholds::default();
        let reasons = rules.reasons(&snapshot(-0.5, 55.0, 0.5, 25.0, 100.0), dec!(95));
        assert_eq!(reasons.len(), 1);
        assert_eq!(reasons[0].rule_name(), "macd_negative");
    }

    #[test]
    fn test_healthy_snapshot_is_clean() {
        let rules = ExitThresholds::default();
        assert!(!rules.requires_exit(&snapshot(1.0, 45.0, 0.5, 25.0, 100.0), dec!(95)));
    }

    #[test]
    fn test_boundaries_are_strict() {
        let rules = ExitThresholds::default();
        // Exactly on every indicator threshold: nothing fires
        assert!(!rules.requires_exit(&snapshot(0.0, 40.0, 0.1, 20.0, 100.0), dec!(95)));
        assert!(!rules.requires_exit(&snapshot(0.0, 75.0, 0.9, 20.0, 100.0), dec!(95)));
        // Stop-loss fires at equality
        let reasons = rules.reasons(&snapshot(1.0, 50.0, 0.5, 25.0, 95.0), dec!(95));
        assert_eq!(reasons.len(), 1);
        assert_eq!(reasons[0].rule_name(), "stop_loss_hit");
    }

    #[test]
    fn test_each_rule_fires() {
        let rules = ExitThresholds::default();
        let cases = [
            (snapshot(1.0, 39.9, 0.5, 25.0, 100.0), "rsi_oversold"),
            (snapshot(1.0, 75.1, 0.5, 25.0, 100.0), "rsi_overbought"),
            (snapshot(1.0, 50.0, 0.05, 25.0, 100.0), "below_lower_band"),
            (snapshot(1.0, 50.0, 0.95, 25.0, 100.0), "above_upper_band"),
            (snapshot(1.0, 50.0, 0.5, 19.9, 100.0), "weak_trend"),
            (snapshot(1.0, 50.0, 0.5, 25.0, 90.0), "stop_loss_hit"),
        ];

        for (snap, expected) in cases {
            let reasons = rules.reasons(&snap, dec!(95));
            assert_eq!(reasons.len(), 1, "{}", expected);
            assert_eq!(reasons[0].rule_name(), expected);
        }
    }

    #[test]
    fn test_missing_readings_never_fire() {
        let rules = ExitThresholds::default();
        assert!(!rules.requires_exit(&IndicatorSnapshot::default(), dec!(95)));
    }

    #[test]
    fn test_multiple_reasons_are_collected() {
        let rules = ExitThresholds::default();
        let reasons = rules.reasons(&snapshot(-1.0, 30.0, 0.02, 12.0, 90.0), dec!(95));
        assert_eq!(reasons.len(), 5);
    }
}
