// =============================================================================
// Tiered OHLCV Store (hot / warm / cold)
// =============================================================================
//
// Logically a mapping `(symbol, timeframe) -> ordered sequence of Bar`. Three
// physical tiers:
//   - hot:  in-memory ring, one per (symbol, timeframe), bounded capacity.
//   - warm: indexed on-disk SQLite table, `INSERT OR IGNORE` semantics.
//   - cold: downsampled on-disk SQLite table carrying provenance columns.
//
// The hot tier is the single writer's working set; warm/cold mirror it
// best-effort so a warm-write failure never fails the caller (see `append`).
// =============================================================================

mod hot;
mod warm_cold;

pub use hot::HotRing;
pub use warm_cold::WarmColdStore;

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::market_data::Candle;

/// Supported bar timeframes, ordered from shortest to longest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    M1,
    M5,
    M15,
    H1,
    H4,
    D1,
    W1,
}

impl Timeframe {
    /// Bar duration in milliseconds.
    pub fn duration_ms(self) -> i64 {
        match self {
            Timeframe::M1 => 60_000,
            Timeframe::M5 => 5 * 60_000,
            Timeframe::M15 => 15 * 60_000,
            Timeframe::H1 => 60 * 60_000,
            Timeframe::H4 => 4 * 60 * 60_000,
            Timeframe::D1 => 24 * 60 * 60_000,
            Timeframe::W1 => 7 * 24 * 60 * 60_000,
        }
    }

    /// Hot-tier ring capacity: roughly one week of bars at this timeframe,
    /// matching the original service's per-timeframe storage budget.
    pub fn hot_capacity(self) -> usize {
        match self {
            Timeframe::M1 => 10_080,
            Timeframe::M5 => 2_016,
            Timeframe::M15 => 672,
            Timeframe::H1 => 168,
            Timeframe::H4 => 42,
            Timeframe::D1 => 30,
            Timeframe::W1 => 12,
        }
    }

    /// Warm-tier retention budget (generous, disk-backed).
    pub fn warm_capacity(self) -> usize {
        match self {
            Timeframe::M1 => 43_200,
            Timeframe::M5 => 43_200,
            Timeframe::M15 => 43_200,
            Timeframe::H1 => 2_160,
            Timeframe::H4 => 540,
            Timeframe::D1 => 180,
            Timeframe::W1 => 104,
        }
    }

    /// Cold-tier retention budget for downsampled history.
    pub fn cold_capacity(self) -> usize {
        match self {
            Timeframe::D1 => 730,
            Timeframe::W1 => 260,
            _ => 0,
        }
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
            Timeframe::W1 => "1w",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Timeframe {
    type Err = crate::error::BotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1m" => Ok(Timeframe::M1),
            "5m" => Ok(Timeframe::M5),
            "15m" => Ok(Timeframe::M15),
            "1h" => Ok(Timeframe::H1),
            "4h" => Ok(Timeframe::H4),
            "1d" => Ok(Timeframe::D1),
            "1w" => Ok(Timeframe::W1),
            other => Err(crate::error::BotError::InvariantViolation(format!(
                "unknown timeframe: {other}"
            ))),
        }
    }
}

/// A lookback period used by `query_by_period`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    OneHour,
    FourHours,
    TwentyFourHours,
    SevenDays,
    ThirtyDays,
}

impl Period {
    pub fn duration_ms(self) -> i64 {
        match self {
            Period::OneHour => 60 * 60_000,
            Period::FourHours => 4 * 60 * 60_000,
            Period::TwentyFourHours => 24 * 60 * 60_000,
            Period::SevenDays => 7 * 24 * 60 * 60_000,
            Period::ThirtyDays => 30 * 24 * 60 * 60_000,
        }
    }
}

/// The tiered store. Owns the in-memory hot ring and an optional on-disk
/// warm/cold backend. The warm/cold backend is optional so the store remains
/// usable (and trivially testable) without a filesystem.
pub struct TieredStore {
    hot: HotRing,
    warm_cold: Option<WarmColdStore>,
}

impl TieredStore {
    pub fn new() -> Self {
        Self {
            hot: HotRing::new(),
            warm_cold: None,
        }
    }

    pub fn with_backend(warm_cold: WarmColdStore) -> Self {
        Self {
            hot: HotRing::new(),
            warm_cold: Some(warm_cold),
        }
    }

    /// Upsert a bar for `(symbol, tf)`. O(1) amortized on the hot ring.
    /// Mirrors to the warm tier best-effort: a warm-write failure is logged
    /// but never propagated to the caller.
    pub async fn append(&self, symbol: &str, tf: Timeframe, bar: Candle) {
        self.hot.append(symbol, tf, bar.clone());

        if let Some(backend) = &self.warm_cold {
            if let Err(e) = backend.insert_bar(symbol, tf, &bar).await {
                warn!(symbol, %tf, error = %e, "warm-tier mirror write failed");
            }
        }
    }

    /// Newest-first bars, falling back to the warm tier if the hot ring has
    /// fewer than `limit` entries.
    pub async fn get(&self, symbol: &str, tf: Timeframe, limit: usize) -> Vec<Candle> {
        let mut hot = self.hot.get_newest_first(symbol, tf, limit);
        if hot.len() >= limit {
            return hot;
        }
        if let Some(backend) = &self.warm_cold {
            match backend.query_newest(symbol, tf, limit).await {
                Ok(warm) => {
                    let have: std::collections::HashSet<i64> =
                        hot.iter().map(|c| c.open_time).collect();
                    for bar in warm {
                        if !have.contains(&bar.open_time) {
                            hot.push(bar);
                        }
                    }
                    hot.sort_by_key(|c| std::cmp::Reverse(c.open_time));
                    hot.truncate(limit);
                }
                Err(e) => warn!(symbol, %tf, error = %e, "warm-tier read failed"),
            }
        }
        hot
    }

    /// Bars covering `period`, oldest-first. Binary-search on the hot
    /// timestamp index; spills to warm on a miss.
    pub async fn query_by_period(&self, symbol: &str, tf: Timeframe, period: Period) -> Vec<Candle> {
        let now_ms = self
            .hot
            .latest_timestamp(symbol, tf)
            .unwrap_or(0);
        let since = now_ms - period.duration_ms();

        let mut bars = self.hot.range_since(symbol, tf, since);
        if let Some(backend) = &self.warm_cold {
            if bars.is_empty() || bars.first().map(|b| b.open_time).unwrap_or(i64::MAX) > since {
                match backend.query_since(symbol, tf, since).await {
                    Ok(warm) => {
                        let have: std::collections::HashSet<i64> =
                            bars.iter().map(|c| c.open_time).collect();
                        for bar in warm {
                            if !have.contains(&bar.open_time) {
                                bars.push(bar);
                            }
                        }
                        bars.sort_by_key(|c| c.open_time);
                    }
                    Err(e) => warn!(symbol, %tf, error = %e, "warm-tier period query failed"),
                }
            }
        }
        bars
    }

    /// Pure fold of `src_tf` bars into `dst_tf` bars. Requires at least 80% of
    /// the expected source bars per destination bar to emit it; idempotent —
    /// running this twice against the same inputs yields the same rows.
    pub async fn aggregate_and_store(
        &self,
        symbol: &str,
        src_tf: Timeframe,
        dst_tf: Timeframe,
    ) -> Vec<Candle> {
        let src_bars = self.hot.get_newest_first(symbol, src_tf, src_tf.hot_capacity());
        let mut src_bars = src_bars;
        src_bars.reverse(); // oldest-first for folding

        let aggregated = aggregate_bars(&src_bars, src_tf, dst_tf);

        for bar in &aggregated {
            self.hot.append(symbol, dst_tf, bar.clone());
            if let Some(backend) = &self.warm_cold {
                if let Err(e) = backend.insert_cold(symbol, dst_tf, src_tf, bar).await {
                    warn!(symbol, %dst_tf, error = %e, "cold-tier aggregate write failed");
                }
            }
        }

        aggregated
    }
}

impl Default for TieredStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Fold contiguous windows of `src_tf` bars into `dst_tf` bars. A window is
/// only emitted if it contains at least 80% of the bars it should (tolerates
/// gaps from exchange outages without silently fabricating data).
fn aggregate_bars(src_bars: &[Candle], src_tf: Timeframe, dst_tf: Timeframe) -> Vec<Candle> {
    if src_bars.is_empty() {
        return Vec::new();
    }
    let ratio = dst_tf.duration_ms() / src_tf.duration_ms();
    if ratio <= 0 {
        return Vec::new();
    }
    let expected_per_window = ratio as usize;
    let min_required = (expected_per_window * 8) / 10;

    let mut out = Vec::new();
    let mut window: Vec<&Candle> = Vec::new();
    let mut window_start = (src_bars[0].open_time / dst_tf.duration_ms()) * dst_tf.duration_ms();

    for bar in src_bars {
        let bucket_start = (bar.open_time / dst_tf.duration_ms()) * dst_tf.duration_ms();
        if bucket_start != window_start {
            if window.len() >= min_required.max(1) {
                out.push(fold_window(&window, window_start, dst_tf));
            }
            window.clear();
            window_start = bucket_start;
        }
        window.push(bar);
    }
    if window.len() >= min_required.max(1) {
        out.push(fold_window(&window, window_start, dst_tf));
    }
    out
}

fn fold_window(window: &[&Candle], window_start: i64, dst_tf: Timeframe) -> Candle {
    let open = window.first().unwrap().open;
    let close = window.last().unwrap().close;
    let high = window.iter().map(|c| c.high).fold(f64::MIN, f64::max);
    let low = window.iter().map(|c| c.low).fold(f64::MAX, f64::min);
    let volume: f64 = window.iter().map(|c| c.volume).sum();
    let quote_volume: f64 = window.iter().map(|c| c.quote_volume).sum();
    let taker_buy_volume: f64 = window.iter().map(|c| c.taker_buy_volume).sum();
    let taker_buy_quote_volume: f64 = window.iter().map(|c| c.taker_buy_quote_volume).sum();
    let trades_count: u64 = window.iter().map(|c| c.trades_count).sum();

    Candle {
        open_time: window_start,
        close_time: window_start + dst_tf.duration_ms() - 1,
        open,
        high,
        low,
        close,
        volume,
        quote_volume,
        trades_count,
        taker_buy_volume,
        taker_buy_quote_volume,
        is_closed: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(open_time: i64, close: f64) -> Candle {
        Candle {
            open_time,
            close_time: open_time + 59_999,
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 10.0,
            quote_volume: 20.0,
            trades_count: 5,
            taker_buy_volume: 3.0,
            taker_buy_quote_volume: 6.0,
            is_closed: true,
        }
    }

    #[tokio::test]
    async fn append_is_idempotent_for_same_timestamp() {
        let store = TieredStore::new();
        store.append("BTCUSDT", Timeframe::M1, bar(0, 100.0)).await;
        store.append("BTCUSDT", Timeframe::M1, bar(0, 100.0)).await;
        let bars = store.get("BTCUSDT", Timeframe::M1, 10).await;
        assert_eq!(bars.len(), 1);
    }

    #[tokio::test]
    async fn append_overwrites_same_timestamp_last_write_wins() {
        let store = TieredStore::new();
        store.append("BTCUSDT", Timeframe::M1, bar(0, 100.0)).await;
        store.append("BTCUSDT", Timeframe::M1, bar(0, 105.0)).await;
        let bars = store.get("BTCUSDT", Timeframe::M1, 10).await;
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].close, 105.0);
    }

    #[tokio::test]
    async fn aggregate_5m_into_15m_requires_80_pct_coverage() {
        let store = TieredStore::new();
        // 3 complete 5m bars -> one 15m bar (ratio = 3, min_required = 2).
        for i in 0..3 {
            store
                .append("BTCUSDT", Timeframe::M5, bar(i * 5 * 60_000, 100.0 + i as f64))
                .await;
        }
        let aggregated = store
            .aggregate_and_store("BTCUSDT", Timeframe::M5, Timeframe::M15)
            .await;
        assert_eq!(aggregated.len(), 1);
        assert_eq!(aggregated[0].open, 100.0);
        assert_eq!(aggregated[0].close, 102.0);
    }

    #[tokio::test]
    async fn aggregate_is_idempotent() {
        let store = TieredStore::new();
        for i in 0..6 {
            store
                .append("ETHUSDT", Timeframe::M5, bar(i * 5 * 60_000, 50.0 + i as f64))
                .await;
        }
        let first = store
            .aggregate_and_store("ETHUSDT", Timeframe::M5, Timeframe::M15)
            .await;
        let second = store
            .aggregate_and_store("ETHUSDT", Timeframe::M5, Timeframe::M15)
            .await;
        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.open_time, b.open_time);
            assert_eq!(a.close, b.close);
        }
    }

    #[test]
    fn timeframe_round_trips_through_display_and_from_str() {
        for tf in [
            Timeframe::M1,
            Timeframe::M5,
            Timeframe::M15,
            Timeframe::H1,
            Timeframe::H4,
            Timeframe::D1,
            Timeframe::W1,
        ] {
            let s = tf.to_string();
            let parsed: Timeframe = s.parse().unwrap();
            assert_eq!(tf, parsed);
        }
    }
}
