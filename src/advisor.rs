// =============================================================================
// AI Advisor (C5, second stage)
// =============================================================================
//
// A single capability, `advise`, collapsing the several provider-specific
// classes the original engine had into one interface. Provider selection is
// a construction-time choice with no effect on the orchestrator's contract.
//
// A `strong_signal` bypass (fused_confidence >= strong_signal threshold)
// skips this stage entirely; see `orchestrator`.
// =============================================================================

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::BotError;
use crate::indicators::IndicatorSnapshot;
use crate::monitor::SignalType;
use crate::validator::ValidationResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdviceResult {
    pub signal: SignalType,
    pub confidence: f64,
    pub reasoning: String,
}

#[async_trait]
pub trait Advisor: Send + Sync {
    async fn advise(
        &self,
        snapshot: &IndicatorSnapshot,
        validation: &ValidationResult,
    ) -> Result<AdviceResult, BotError>;
}

/// The only concrete advisor shipped with this core: it re-derives its
/// answer from the same snapshot/validation the validator already computed,
/// with no network call. This exists to exercise the `Advisor` boundary
/// end-to-end; an external-provider implementation is a separate, optional
/// collaborator (see spec's deliberately-out-of-scope list).
pub struct RuleBasedAdvisor;

#[async_trait]
impl Advisor for RuleBasedAdvisor {
    async fn advise(
        &self,
        snapshot: &IndicatorSnapshot,
        validation: &ValidationResult,
    ) -> Result<AdviceResult, BotError> {
        let signal = if !validation.passed {
            SignalType::Hold
        } else if snapshot.trend_direction == crate::indicators::TrendDirection::Down
            && snapshot.trend_strength > 0.8
        {
            SignalType::Hold
        } else {
            SignalType::Buy
        };

        Ok(AdviceResult {
            signal,
            confidence: validation.confidence,
            reasoning: format!(
                "rule-based: trend={:?} strength={:.2} validator_passed={}",
                snapshot.trend_direction, snapshot.trend_strength, validation.passed
            ),
        })
    }
}

/// Invoke `advisor.advise(...)` with a hard deadline. On timeout or error the
/// caller should fall back to the validator's own decision (never block the
/// cycle indefinitely on a misbehaving advisor).
pub async fn advise_with_timeout(
    advisor: &dyn Advisor,
    snapshot: &IndicatorSnapshot,
    validation: &ValidationResult,
    timeout: Duration,
) -> Option<AdviceResult> {
    match tokio::time::timeout(timeout, advisor.advise(snapshot, validation)).await {
        Ok(Ok(advice)) => Some(advice),
        Ok(Err(e)) => {
            warn!(error = %e, "advisor returned an error, falling back to validator decision");
            None
        }
        Err(_) => {
            warn!("advisor timed out, falling back to validator decision");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::TrendDirection;

    fn snapshot(trend: TrendDirection, strength: f64) -> IndicatorSnapshot {
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
            trend_direction: trend,
            trend_strength: strength,
            unready: false,
        }
    }

    fn validation(passed: bool, confidence: f64) -> ValidationResult {
        ValidationResult {
            passed,
            confidence,
            details: Vec::new(),
            message: "test".to_string(),
        }
    }

    #[tokio::test]
    async fn rule_based_advisor_holds_on_failed_validation() {
        let advisor = RuleBasedAdvisor;
        let snap = snapshot(TrendDirection::Up, 0.3);
        let advice = advisor.advise(&snap, &validation(false, 0.2)).await.unwrap();
        assert_eq!(advice.signal, SignalType::Hold);
    }

    #[tokio::test]
    async fn rule_based_advisor_buys_on_healthy_validation() {
        let advisor = RuleBasedAdvisor;
        let snap = snapshot(TrendDirection::Up, 0.3);
        let advice = advisor.advise(&snap, &validation(true, 0.7)).await.unwrap();
        assert_eq!(advice.signal, SignalType::Buy);
    }

    #[tokio::test]
    async fn timeout_wrapper_falls_back_on_slow_advisor() {
        struct SlowAdvisor;
        #[async_trait]
        impl Advisor for SlowAdvisor {
            async fn advise(
                &self,
                _snapshot: &IndicatorSnapshot,
                _validation: &ValidationResult,
            ) -> Result<AdviceResult, BotError> {
                tokio::time::sleep(Duration::from_secs(10)).await;
                unreachable!("should have timed out first");
            }
        }

        let advisor = SlowAdvisor;
        let snap = snapshot(TrendDirection::Up, 0.3);
        let result = advise_with_timeout(
            &advisor,
            &snap,
            &validation(true, 0.7),
            Duration::from_millis(20),
        )
        .await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn timeout_wrapper_returns_advice_on_fast_advisor() {
        let advisor = RuleBasedAdvisor;
        let snap = snapshot(TrendDirection::Up, 0.3);
        let result = advise_with_timeout(
            &advisor,
            &snap,
            &validation(true, 0.7),
            Duration::from_secs(1),
        )
        .await;
        assert!(result.is_some());
    }
}
