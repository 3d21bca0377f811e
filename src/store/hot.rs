// =============================================================================
// Hot tier -- in-memory ring per (symbol, timeframe)
// =============================================================================
//
// Generalizes the kline ring buffer pattern (see `market_data::candle_buffer`)
// to arbitrary timeframes with a parallel timestamp index for binary-search
// range queries, as required by `query_by_period`.
// =============================================================================

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;

use crate::market_data::Candle;

use super::Timeframe;

#[derive(Debug, Clone, Hash, Eq, PartialEq)]
struct HotKey {
    symbol: String,
    tf: Timeframe,
}

pub struct HotRing {
    rings: RwLock<HashMap<HotKey, VecDeque<Candle>>>,
}

impl HotRing {
    pub fn new() -> Self {
        Self {
            rings: RwLock::new(HashMap::new()),
        }
    }

    fn key(symbol: &str, tf: Timeframe) -> HotKey {
        HotKey {
            symbol: symbol.to_string(),
            tf,
        }
    }

    /// Upsert by timestamp. Equal `open_time` overwrites (last-write-wins);
    /// a strictly older timestamp than the ring's newest bar is rejected.
    pub fn append(&self, symbol: &str, tf: Timeframe, bar: Candle) {
        let mut rings = self.rings.write();
        let ring = rings
            .entry(Self::key(symbol, tf))
            .or_insert_with(|| VecDeque::with_capacity(tf.hot_capacity() + 1));

        if let Some(last) = ring.back() {
            if bar.open_time < last.open_time {
                // Strictly older than the newest bar -- reject.
                return;
            }
            if bar.open_time == last.open_time {
                ring.pop_back();
                ring.push_back(bar);
                return;
            }
        }

        ring.push_back(bar);
        let cap = tf.hot_capacity();
        while ring.len() > cap {
            ring.pop_front();
        }
    }

    /// Newest-first bars, up to `limit`.
    pub fn get_newest_first(&self, symbol: &str, tf: Timeframe, limit: usize) -> Vec<Candle> {
        let rings = self.rings.read();
        match rings.get(&Self::key(symbol, tf)) {
            Some(ring) => ring.iter().rev().take(limit).cloned().collect(),
            None => Vec::new(),
        }
    }

    /// Oldest-first bars with `open_time >= since`, located via binary search
    /// over the ring's (already timestamp-ordered) contents.
    pub fn range_since(&self, symbol: &str, tf: Timeframe, since: i64) -> Vec<Candle> {
        let rings = self.rings.read();
        match rings.get(&Self::key(symbol, tf)) {
            Some(ring) => {
                let idx = ring.partition_point(|c| c.open_time < since);
                ring.iter().skip(idx).cloned().collect()
            }
            None => Vec::new(),
        }
    }

    pub fn latest_timestamp(&self, symbol: &str, tf: Timeframe) -> Option<i64> {
        let rings = self.rings.read();
        rings
            .get(&Self::key(symbol, tf))
            .and_then(|r| r.back())
            .map(|c| c.open_time)
    }
}

impl Default for HotRing {
    fn default() -> Self {
        Self::new()
    }
}
