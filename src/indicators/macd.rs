// =============================================================================
// MACD — Moving Average Convergence Divergence
// =============================================================================
//
// Standard 12/26/9 configuration: MACD line = EMA12 - EMA26, signal line =
// EMA9 of the MACD line, histogram = MACD - signal.
// =============================================================================

use super::ema::calculate_ema;

/// A single MACD reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacdValue {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// Compute the full MACD series using the classic 12/26/9 periods.
///
/// Returns one `MacdValue` per close once enough history exists for the
/// signal line (needs `fast_ema` and `slow_ema` series aligned, then 9 more
/// points for the signal EMA). Returns an empty vec when there isn't enough
/// data.
pub fn calculate_macd(closes: &[f64]) -> Vec<MacdValue> {
    calculate_macd_with_periods(closes, 12, 26, 9)
}

/// Same as [`calculate_macd`] but with explicit fast/slow/signal periods.
pub fn calculate_macd_with_periods(
    closes: &[f64],
    fast: usize,
    slow: usize,
    signal_period: usize,
) -> Vec<MacdValue> {
    if fast == 0 || slow == 0 || signal_period == 0 || fast >= slow {
        return Vec::new();
    }
    if closes.len() < slow {
        return Vec::new();
    }

    let ema_fast = calculate_ema(closes, fast);
    let ema_slow = calculate_ema(closes, slow);

    // ema_fast is longer (starts earlier) than ema_slow by (slow - fast)
    // elements; align them on the same trailing close.
    let offset = ema_fast.len() - ema_slow.len();
    let macd_line: Vec<f64> = ema_slow
        .iter()
        .zip(ema_fast[offset..].iter())
        .map(|(&slow_v, &fast_v)| fast_v - slow_v)
        .collect();

    if macd_line.len() < signal_period {
        return Vec::new();
    }

    let signal_line = calculate_ema(&macd_line, signal_period);
    let signal_offset = macd_line.len() - signal_line.len();

    macd_line[signal_offset..]
        .iter()
        .zip(signal_line.iter())
        .map(|(&macd, &signal)| MacdValue {
            macd,
            signal,
            histogram: macd - signal,
        })
        .collect()
}

/// Convenience accessor for the most recent MACD reading.
///
/// Returns `None` when there isn't enough history (fewer than 26 + 9 closes).
pub fn current_macd(closes: &[f64]) -> Option<MacdValue> {
    calculate_macd(closes).last().copied()
}
