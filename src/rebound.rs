// =============================================================================
// Oversold-Rebound Detector (C4)
// =============================================================================
//
// Stateful over consecutive snapshots per symbol: watches for RSI crossing up
// out of oversold territory while MACD histogram turns positive and price
// sits near the bottom of its 24h range.
//
// Reset policy: once triggered and consumed by the monitor, the detector
// suppresses further rebounds for that symbol until RSI drops back below 30.
// =============================================================================

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::indicators::IndicatorSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReboundSignal {
    Buy,
    Hold,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReboundState {
    pub signal_type: ReboundSignal,
    pub confidence: f64,
    pub triggers: Vec<String>,
}

impl ReboundState {
    fn hold() -> Self {
        Self {
            signal_type: ReboundSignal::Hold,
            confidence: 0.0,
            triggers: Vec::new(),
        }
    }
}

pub struct OversoldReboundDetector {
    /// Per-symbol: true once a rebound has fired and been consumed, cleared
    /// again only when RSI drops back below 30.
    suppressed: RwLock<HashMap<String, bool>>,
}

impl OversoldReboundDetector {
    pub fn new() -> Self {
        Self {
            suppressed: RwLock::new(HashMap::new()),
        }
    }

    /// Evaluate the rebound condition from the last two snapshots for
    /// `symbol`. Does not mutate suppression state -- call [`consume`] once
    /// the caller (C3) has actually acted on a `Buy` result.
    pub fn check_rebound(
        &self,
        symbol: &str,
        prev: &IndicatorSnapshot,
        current: &IndicatorSnapshot,
    ) -> ReboundState {
        if self.is_suppressed(symbol) && current.rsi >= 30.0 {
            return ReboundState::hold();
        }

        let rsi_crossed_up = prev.rsi < 30.0 && current.rsi >= 30.0;
        let histogram_rising = current.macd_histogram > prev.macd_histogram;
        let histogram_turning_positive = current.macd_histogram >= 0.0;
        let near_bottom = current.price_position_24h <= 20.0;

        if !(rsi_crossed_up && histogram_rising && histogram_turning_positive && near_bottom) {
            return ReboundState::hold();
        }

        let delta_rsi = current.rsi - prev.rsi;
        let delta_histogram_normalized =
            (current.macd_histogram - prev.macd_histogram).clamp(-1.0, 1.0);
        let confidence = (0.5
            + 0.1 * (delta_rsi / 10.0)
            + 0.1 * delta_histogram_normalized
            + 0.1 * ((20.0 - current.price_position_24h) / 20.0))
            .clamp(0.0, 1.0);

        let mut triggers = Vec::new();
        triggers.push(format!(
            "RSI crossed up from oversold ({:.1} -> {:.1})",
            prev.rsi, current.rsi
        ));
        triggers.push(format!(
            "MACD histogram rising and non-negative ({:.4} -> {:.4})",
            prev.macd_histogram, current.macd_histogram
        ));
        triggers.push(format!(
            "price_position_24h near bottom ({:.1} <= 20)",
            current.price_position_24h
        ));

        ReboundState {
            signal_type: ReboundSignal::Buy,
            confidence,
            triggers,
        }
    }

    /// Mark a fired rebound as consumed by the monitor. Suppresses further
    /// rebounds for `symbol` until the next time RSI drops below 30.
    pub fn consume(&self, symbol: &str) {
        self.suppressed.write().insert(symbol.to_string(), true);
    }

    fn is_suppressed(&self, symbol: &str) -> bool {
        *self.suppressed.read().get(symbol).unwrap_or(&false)
    }

    /// Lift suppression once RSI has dropped back below 30, per the reset
    /// policy. Called by the monitor every tick alongside `check_rebound`.
    pub fn observe(&self, symbol: &str, snapshot: &IndicatorSnapshot) {
        if snapshot.rsi < 30.0 {
            self.suppressed.write().insert(symbol.to_string(), false);
        }
    }
}

impl Default for OversoldReboundDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::TrendDirection;

    fn snapshot(rsi: f64, histogram: f64, price_position_24h: f64) -> IndicatorSnapshot {
        IndicatorSnapshot {
            current_price: 100.0,
            high_24h: 110.0,
            low_24h: 90.0,
            high_7d: 120.0,
            low_7d: 80.0,
            price_position_24h,
            price_position_7d: 10.0,
            atr: 1.0,
            atr_pct: 1.0,
            rsi,
            macd: 0.0,
            macd_signal: 0.0,
            macd_histogram: histogram,
            adx: 20.0,
            plus_di: 25.0,
            minus_di: 15.0,
            bb_upper: 105.0,
            bb_middle: 100.0,
            bb_lower: 95.0,
            bb_position: 15.0,
            trend_direction: TrendDirection::Up,
            trend_strength: 0.2,
            unready: false,
        }
    }

    #[test]
    fn fires_buy_on_full_rebound_conditions() {
        let detector = OversoldReboundDetector::new();
        let prev = snapshot(28.0, -1.0, 10.0);
        let current = snapshot(32.0, 0.2, 10.0);
        let result = detector.check_rebound("BTCUSDT", &prev, &current);
        assert_eq!(result.signal_type, ReboundSignal::Buy);
        assert!(result.confidence > 0.0 && result.confidence <= 1.0);
        assert_eq!(result.triggers.len(), 3);
    }

    #[test]
    fn holds_when_price_position_not_near_bottom() {
        let detector = OversoldReboundDetector::new();
        let prev = snapshot(28.0, -1.0, 50.0);
        let current = snapshot(32.0, 0.2, 50.0);
        let result = detector.check_rebound("BTCUSDT", &prev, &current);
        assert_eq!(result.signal_type, ReboundSignal::Hold);
    }

    #[test]
    fn holds_when_histogram_falling() {
        let detector = OversoldReboundDetector::new();
        let prev = snapshot(28.0, 1.0, 10.0);
        let current = snapshot(32.0, 0.5, 10.0);
        let result = detector.check_rebound("BTCUSDT", &prev, &current);
        assert_eq!(result.signal_type, ReboundSignal::Hold);
    }

    #[test]
    fn suppressed_after_consume_until_rsi_drops_below_30_again() {
        let detector = OversoldReboundDetector::new();
        let prev = snapshot(28.0, -1.0, 10.0);
        let current = snapshot(32.0, 0.2, 10.0);

        let first = detector.check_rebound("BTCUSDT", &prev, &current);
        assert_eq!(first.signal_type, ReboundSignal::Buy);
        detector.consume("BTCUSDT");

        // Same inputs again -- suppressed now that RSI stayed >= 30.
        let second = detector.check_rebound("BTCUSDT", &prev, &current);
        assert_eq!(second.signal_type, ReboundSignal::Hold);

        // RSI drops back below 30 -- suppression lifts.
        let dip = snapshot(25.0, 0.1, 10.0);
        detector.observe("BTCUSDT", &dip);
        let third = detector.check_rebound("BTCUSDT", &dip, &current);
        assert_eq!(third.signal_type, ReboundSignal::Buy);
    }
}
