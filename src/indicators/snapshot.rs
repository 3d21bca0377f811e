// =============================================================================
// IndicatorSnapshot -- C1 outputs assembled into one immutable record
// =============================================================================
//
// Derived from the last >= 50 bars of one timeframe (the working timeframe,
// 5m by default). Carries everything the scoring and rebound-detector stages
// need. Snapshots are immutable once produced.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::market_data::Candle;

use super::{adx, atr, bollinger, macd, rsi};

/// Number of 5m bars covering 24 hours / 7 days, used for the rolling
/// high/low window. Other working timeframes would need their own constants;
/// the core only ever runs at 5m (see spec's working_timeframe default).
pub const BARS_24H_AT_5M: usize = 288;
pub const BARS_7D_AT_5M: usize = 2016;

const MIN_BARS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrendDirection {
    Up,
    Down,
    Sideways,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub current_price: f64,
    pub high_24h: f64,
    pub low_24h: f64,
    pub high_7d: f64,
    pub low_7d: f64,
    pub price_position_24h: f64,
    pub price_position_7d: f64,
    pub atr: f64,
    pub atr_pct: f64,
    pub rsi: f64,
    pub macd: f64,
    pub macd_signal: f64,
    pub macd_histogram: f64,
    pub adx: f64,
    pub plus_di: f64,
    pub minus_di: f64,
    pub bb_upper: f64,
    pub bb_middle: f64,
    pub bb_lower: f64,
    pub bb_position: f64,
    pub trend_direction: TrendDirection,
    pub trend_strength: f64,
    pub unready: bool,
}

impl IndicatorSnapshot {
    /// Whether this snapshot sits in the oversold-area weight-profile zone:
    /// `price_position_24h < 15 AND price_position_7d < 15 AND RSI < 30`.
    pub fn is_oversold_area(&self) -> bool {
        self.price_position_24h < 15.0 && self.price_position_7d < 15.0 && self.rsi < 30.0
    }

    /// The "low-price gate" conjunction required for any BUY.
    pub fn passes_low_price_gate(&self) -> bool {
        self.bb_position < 50.0 && self.price_position_24h < 50.0 && self.price_position_7d < 40.0
    }
}

/// A neutral, `unready` snapshot emitted when there isn't enough history yet.
fn neutral_snapshot(current_price: f64) -> IndicatorSnapshot {
    IndicatorSnapshot {
        current_price,
        high_24h: current_price,
        low_24h: current_price,
        high_7d: current_price,
        low_7d: current_price,
        price_position_24h: 50.0,
        price_position_7d: 50.0,
        atr: 0.0,
        atr_pct: 0.0,
        rsi: 50.0,
        macd: 0.0,
        macd_signal: 0.0,
        macd_histogram: 0.0,
        adx: 0.0,
        plus_di: 0.0,
        minus_di: 0.0,
        bb_upper: current_price,
        bb_middle: current_price,
        bb_lower: current_price,
        bb_position: 50.0,
        trend_direction: TrendDirection::Unknown,
        trend_strength: 0.0,
        unready: true,
    }
}

/// `(price - low) / (high - low) * 100`, clamped to a neutral 50 when the
/// window has zero range (division guard).
fn price_position(price: f64, low: f64, high: f64) -> f64 {
    let range = high - low;
    if range.abs() < f64::EPSILON {
        return 50.0;
    }
    ((price - low) / range * 100.0).clamp(0.0, 100.0)
}

/// Compute a full indicator snapshot from closed, oldest-first candles at
/// the working timeframe. Returns an `unready` neutral snapshot when there
/// isn't enough history (see §4.1 failure mode).
pub fn compute_snapshot(candles: &[Candle]) -> IndicatorSnapshot {
    let Some(last) = candles.last() else {
        return neutral_snapshot(0.0);
    };
    let current_price = last.close;

    if candles.len() < MIN_BARS {
        return neutral_snapshot(current_price);
    }

    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();

    let window_24h = &candles[candles.len().saturating_sub(BARS_24H_AT_5M)..];
    let window_7d = &candles[candles.len().saturating_sub(BARS_7D_AT_5M)..];

    let high_24h = window_24h.iter().map(|c| c.high).fold(f64::MIN, f64::max);
    let low_24h = window_24h.iter().map(|c| c.low).fold(f64::MAX, f64::min);
    let high_7d = window_7d.iter().map(|c| c.high).fold(f64::MIN, f64::max);
    let low_7d = window_7d.iter().map(|c| c.low).fold(f64::MAX, f64::min);

    let price_position_24h = price_position(current_price, low_24h, high_24h);
    let price_position_7d = price_position(current_price, low_7d, high_7d);

    let atr_value = atr::calculate(candles).unwrap_or(0.0);
    let atr_pct = if current_price.abs() > f64::EPSILON {
        (atr_value / current_price) * 100.0
    } else {
        0.0
    };

    let (rsi_value, _) = rsi::current_rsi(&closes, 14).unwrap_or((50.0, "NEUTRAL"));

    let macd_value = macd::current_macd(&closes);
    let (macd_line, macd_signal, macd_histogram) = macd_value
        .map(|m| (m.macd, m.signal, m.histogram))
        .unwrap_or((0.0, 0.0, 0.0));

    let adx_full = adx::calculate_adx_full(candles, 14);
    let (adx_value, plus_di, minus_di) = adx_full
        .map(|a| (a.adx, a.plus_di, a.minus_di))
        .unwrap_or((0.0, 0.0, 0.0));

    let bb = bollinger::calculate_bollinger(&closes, 20, 2.0);
    let (bb_upper, bb_middle, bb_lower) = bb
        .map(|b| (b.upper, b.middle, b.lower))
        .unwrap_or((current_price, current_price, current_price));
    let bb_position = price_position(current_price, bb_lower, bb_upper);

    let unready = atr_value == 0.0 && adx_value == 0.0 && macd_value.is_none();

    let trend_direction = if unready {
        TrendDirection::Unknown
    } else if adx_value >= 20.0 && plus_di > minus_di {
        TrendDirection::Up
    } else if adx_value >= 20.0 && minus_di > plus_di {
        TrendDirection::Down
    } else {
        TrendDirection::Sideways
    };
    let trend_strength = (adx_value / 100.0).clamp(0.0, 1.0);

    IndicatorSnapshot {
        current_price,
        high_24h,
        low_24h,
        high_7d,
        low_7d,
        price_position_24h,
        price_position_7d,
        atr: atr_value,
        atr_pct,
        rsi: rsi_value,
        macd: macd_line,
        macd_signal,
        macd_histogram,
        adx: adx_value,
        plus_di,
        minus_di,
        bb_upper,
        bb_middle,
        bb_lower,
        bb_position,
        trend_direction,
        trend_strength,
        unready,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(open_time: i64, close: f64) -> Candle {
        Candle {
            open_time,
            close_time: open_time + 299_999,
            open: close,
            high: close + 0.5,
            low: close - 0.5,
            close,
            volume: 10.0,
            quote_volume: 10.0,
            trades_count: 1,
            taker_buy_volume: 5.0,
            taker_buy_quote_volume: 5.0,
            is_closed: true,
        }
    }

    #[test]
    fn insufficient_data_is_unready() {
        let candles: Vec<Candle> = (0..10).map(|i| candle(i * 300_000, 100.0)).collect();
        let snap = compute_snapshot(&candles);
        assert!(snap.unready);
        assert_eq!(snap.rsi, 50.0);
    }

    #[test]
    fn empty_input_is_unready() {
        let snap = compute_snapshot(&[]);
        assert!(snap.unready);
    }

    #[test]
    fn score_bounds_are_respected_on_ready_snapshot() {
        // 300 bars of a mild uptrend -- enough for every indicator window.
        let candles: Vec<Candle> = (0..300)
            .map(|i| candle(i * 300_000, 100.0 + (i as f64) * 0.05))
            .collect();
        let snap = compute_snapshot(&candles);
        assert!(!snap.unready);
        assert!((0.0..=100.0).contains(&snap.price_position_24h));
        assert!((0.0..=100.0).contains(&snap.price_position_7d));
        assert!((0.0..=100.0).contains(&snap.rsi));
        assert!((0.0..=100.0).contains(&snap.bb_position));
    }

    #[test]
    fn price_position_handles_zero_range() {
        assert_eq!(price_position(100.0, 100.0, 100.0), 50.0);
    }
}
