// =============================================================================
// ScoreVector -- per-indicator weighted fusion
// =============================================================================
//
// Weights come from one of two profiles, selected by a pure predicate on the
// snapshot (never mutable state, so fusion stays deterministic -- see
// `IndicatorSnapshot::is_oversold_area`). The normal profile sums to 1.0; the
// oversold-area profile intentionally de-emphasizes MACD and leans harder on
// price-position.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::indicators::IndicatorSnapshot;

/// One indicator's normalized contribution in [-1, 1] plus its weight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreContribution {
    pub name: String,
    pub weight: f64,
    pub factor: f64,
    pub contribution: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreVector {
    pub trade_score: f64,
    pub contributions: Vec<ScoreContribution>,
    pub used_oversold_weights: bool,
}

struct WeightProfile {
    rsi: f64,
    bb_position: f64,
    macd: f64,
    adx: f64,
    price_position_24h: f64,
    price_position_7d: f64,
    volatility: f64,
}

const NORMAL_WEIGHTS: WeightProfile = WeightProfile {
    rsi: 0.20,
    bb_position: 0.15,
    macd: 0.15,
    adx: 0.10,
    price_position_24h: 0.20,
    price_position_7d: 0.10,
    volatility: 0.10,
};

const OVERSOLD_WEIGHTS: WeightProfile = WeightProfile {
    rsi: 0.25,
    bb_position: 0.10,
    macd: 0.03,
    adx: 0.12,
    price_position_24h: 0.35,
    price_position_7d: 0.15,
    volatility: 0.00,
};

/// `rsi` factor: [-1, 1] where oversold (<30) pulls toward +1 (bullish) and
/// overbought (>70) pulls toward -1.
fn rsi_factor(rsi: f64) -> f64 {
    ((50.0 - rsi) / 50.0).clamp(-1.0, 1.0)
}

/// `bb_position` factor: low in the band is bullish, high is bearish.
fn bb_position_factor(bb_position: f64) -> f64 {
    ((50.0 - bb_position) / 50.0).clamp(-1.0, 1.0)
}

/// `macd` factor: sign and magnitude of the histogram, normalized by price.
fn macd_factor(histogram: f64, price: f64) -> f64 {
    if price.abs() < f64::EPSILON {
        return 0.0;
    }
    ((histogram / price) * 200.0).clamp(-1.0, 1.0)
}

/// `adx` factor: trend strength signed by direction (+DI vs -DI).
fn adx_factor(adx: f64, plus_di: f64, minus_di: f64) -> f64 {
    let strength = (adx / 50.0).clamp(0.0, 1.0);
    if plus_di >= minus_di {
        strength
    } else {
        -strength
    }
}

/// `price_position` factor: low position is bullish (room to rise).
fn price_position_factor(position: f64) -> f64 {
    ((50.0 - position) / 50.0).clamp(-1.0, 1.0)
}

/// `volatility` factor: very low ATR% is a mild bearish signal (no momentum
/// behind a move), very high is a mild bullish signal (expansion), centered
/// on 1%.
fn volatility_factor(atr_pct: f64) -> f64 {
    ((atr_pct - 1.0) / 3.0).clamp(-1.0, 1.0)
}

/// Compute the fused trade score from an indicator snapshot. Weight profile
/// switches to the oversold-area table when `snapshot.is_oversold_area()`.
pub fn score(snapshot: &IndicatorSnapshot) -> ScoreVector {
    let oversold = snapshot.is_oversold_area();
    let w = if oversold { &OVERSOLD_WEIGHTS } else { &NORMAL_WEIGHTS };

    let factors: [(&str, f64, f64); 7] = [
        ("rsi", w.rsi, rsi_factor(snapshot.rsi)),
        ("bb_position", w.bb_position, bb_position_factor(snapshot.bb_position)),
        (
            "macd",
            w.macd,
            macd_factor(snapshot.macd_histogram, snapshot.current_price),
        ),
        (
            "adx",
            w.adx,
            adx_factor(snapshot.adx, snapshot.plus_di, snapshot.minus_di),
        ),
        (
            "price_position_24h",
            w.price_position_24h,
            price_position_factor(snapshot.price_position_24h),
        ),
        (
            "price_position_7d",
            w.price_position_7d,
            price_position_factor(snapshot.price_position_7d),
        ),
        ("volatility", w.volatility, volatility_factor(snapshot.atr_pct)),
    ];

    let mut contributions = Vec::with_capacity(factors.len());
    let mut total = 0.0;
    for (name, weight, factor) in factors {
        let contribution = weight * factor;
        total += contribution;
        contributions.push(ScoreContribution {
            name: name.to_string(),
            weight,
            factor,
            contribution,
        });
    }

    ScoreVector {
        trade_score: total.clamp(-1.0, 1.0),
        contributions,
        used_oversold_weights: oversold,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::TrendDirection;

    fn snapshot(rsi: f64, price_position_24h: f64, price_position_7d: f64) -> IndicatorSnapshot {
        IndicatorSnapshot {
            current_price: 100.0,
            high_24h: 110.0,
            low_24h: 90.0,
            high_7d: 120.0,
            low_7d: 80.0,
            price_position_24h,
            price_position_7d,
            atr: 1.0,
            atr_pct: 1.0,
            rsi,
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

    #[test]
    fn score_always_within_bounds() {
        for rsi in [0.0, 10.0, 30.0, 50.0, 70.0, 90.0, 100.0] {
            for pp in [0.0, 20.0, 50.0, 80.0, 100.0] {
                let snap = snapshot(rsi, pp, pp);
                let sv = score(&snap);
                assert!(
                    (-1.0..=1.0).contains(&sv.trade_score),
                    "trade_score {} out of bounds for rsi={rsi} pp={pp}",
                    sv.trade_score
                );
            }
        }
    }

    #[test]
    fn oversold_area_switches_weight_profile() {
        let snap = snapshot(25.0, 10.0, 10.0);
        assert!(snap.is_oversold_area());
        let sv = score(&snap);
        assert!(sv.used_oversold_weights);
    }

    #[test]
    fn normal_conditions_use_normal_weights() {
        let snap = snapshot(50.0, 50.0, 50.0);
        assert!(!snap.is_oversold_area());
        let sv = score(&snap);
        assert!(!sv.used_oversold_weights);
    }

    #[test]
    fn fusion_is_deterministic() {
        let snap = snapshot(28.0, 12.0, 9.0);
        let a = score(&snap);
        let b = score(&snap);
        assert_eq!(a.trade_score, b.trade_score);
    }

    #[test]
    fn deep_oversold_scores_bullish() {
        let snap = snapshot(20.0, 5.0, 5.0);
        let sv = score(&snap);
        assert!(sv.trade_score > 0.0, "expected bullish score, got {}", sv.trade_score);
    }
}
