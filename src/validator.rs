// =============================================================================
// Signal Validator (C5, first stage)
// =============================================================================
//
// Takes a `SignalCheckResult` and applies a second-stage sanity check before
// the orchestrator acts on it: minimum confidence, volatility sanity, and
// trend-consistency for BUY signals.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::indicators::TrendDirection;
use crate::monitor::{SignalCheckResult, SignalType};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub passed: bool,
    pub confidence: f64,
    pub details: Vec<String>,
    pub message: String,
}

pub struct SignalValidator {
    pub min_confidence: f64,
}

impl SignalValidator {
    pub fn new(min_confidence: f64) -> Self {
        Self { min_confidence }
    }

    pub fn validate(&self, result: &SignalCheckResult) -> ValidationResult {
        let mut details = Vec::new();
        let mut passed = true;

        if result.fused_confidence < self.min_confidence {
            passed = false;
            details.push(format!(
                "fused_confidence {:.3} below minimum {:.3}",
                result.fused_confidence, self.min_confidence
            ));
        }

        let atr_pct = result.indicator_snapshot.atr_pct;
        if !(0.1..=10.0).contains(&atr_pct) {
            passed = false;
            details.push(format!(
                "ATR% {atr_pct:.3} outside sane volatility band [0.1, 10.0]"
            ));
        }

        if result.signal_type == SignalType::Buy {
            let strong_down = result.indicator_snapshot.trend_direction == TrendDirection::Down
                && result.indicator_snapshot.trend_strength.abs() > 0.5;
            let rebound_override = result
                .triggers
                .iter()
                .any(|t| t.to_lowercase().contains("rebound"));
            if strong_down && !rebound_override {
                passed = false;
                details.push("trend strongly down with no rebound override".to_string());
            }
        }

        let message = if passed {
            "validation passed".to_string()
        } else {
            details.join("; ")
        };

        ValidationResult {
            passed,
            confidence: result.fused_confidence,
            details,
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::IndicatorSnapshot;

    fn base_snapshot() -> IndicatorSnapshot {
        IndicatorSnapshot {
            current_price: 100.0,
            high_24h: 110.0,
            low_24h: 90.0,
            high_7d: 120.0,
            low_7d: 80.0,
            price_position_24h: 30.0,
            price_position_7d: 30.0,
            atr: 1.0,
            atr_pct: 1.0,
            rsi: 50.0,
            macd: 0.0,
            macd_signal: 0.0,
            macd_histogram: 0.0,
            adx: 20.0,
            plus_di: 20.0,
            minus_di: 15.0,
            bb_upper: 105.0,
            bb_middle: 100.0,
            bb_lower: 95.0,
            bb_position: 40.0,
            trend_direction: TrendDirection::Up,
            trend_strength: 0.3,
            unready: false,
        }
    }

    fn base_result(fused_confidence: f64, signal_type: SignalType) -> SignalCheckResult {
        SignalCheckResult {
            should_trade: signal_type != SignalType::Hold,
            signal_type,
            trade_score: 0.3,
            fused_confidence,
            triggers: vec!["momentum".to_string()],
            indicator_snapshot: base_snapshot(),
            message: "test".to_string(),
        }
    }

    #[test]
    fn rejects_low_confidence() {
        let validator = SignalValidator::new(0.5);
        let result = base_result(0.3, SignalType::Buy);
        let v = validator.validate(&result);
        assert!(!v.passed);
    }

    #[test]
    fn rejects_extreme_volatility() {
        let validator = SignalValidator::new(0.5);
        let mut result = base_result(0.7, SignalType::Buy);
        result.indicator_snapshot.atr_pct = 15.0;
        let v = validator.validate(&result);
        assert!(!v.passed);
    }

    #[test]
    fn rejects_buy_in_strong_downtrend_without_rebound() {
        let validator = SignalValidator::new(0.5);
        let mut result = base_result(0.7, SignalType::Buy);
        result.indicator_snapshot.trend_direction = TrendDirection::Down;
        result.indicator_snapshot.trend_strength = 0.9;
        result.triggers = vec!["momentum".to_string()];
        let v = validator.validate(&result);
        assert!(!v.passed);
    }

    #[test]
    fn allows_buy_in_strong_downtrend_with_rebound_override() {
        let validator = SignalValidator::new(0.5);
        let mut result = base_result(0.7, SignalType::Buy);
        result.indicator_snapshot.trend_direction = TrendDirection::Down;
        result.indicator_snapshot.trend_strength = 0.9;
        result.triggers = vec!["rebound confirmed".to_string()];
        let v = validator.validate(&result);
        assert!(v.passed);
    }

    #[test]
    fn passes_healthy_signal() {
        let validator = SignalValidator::new(0.5);
        let result = base_result(0.7, SignalType::Buy);
        let v = validator.validate(&result);
        assert!(v.passed);
    }
}
