// =============================================================================
// Market Monitor (C3)
// =============================================================================
//
// Per tick, per symbol: fetch bars into the tiered store, compute an
// indicator snapshot, derive the fused trade score, consult the oversold-
// rebound detector, fuse into a signal per the fusion table, apply the
// low-price gate, and apply the cooldown filter.
//
// Cooldown is armed on execution, not intent (see the orchestrator's
// `record_execution`): this component only *reads* cooldown state here.
// =============================================================================

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::indicators::{compute_snapshot, IndicatorSnapshot};
use crate::market_data::Candle;
use crate::rebound::{OversoldReboundDetector, ReboundSignal};
use crate::score;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalType {
    Buy,
    Sell,
    Hold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalCheckResult {
    pub should_trade: bool,
    pub signal_type: SignalType,
    pub trade_score: f64,
    pub fused_confidence: f64,
    pub triggers: Vec<String>,
    pub indicator_snapshot: IndicatorSnapshot,
    pub message: String,
}

/// Per-symbol book-keeping the monitor needs across ticks: the previous
/// snapshot (for the rebound detector) and the last-fired timestamp per
/// side (for the cooldown filter).
#[derive(Default)]
struct SymbolState {
    prev_snapshot: Option<IndicatorSnapshot>,
    last_fire: HashMap<Side, DateTime<Utc>>,
}

pub struct MarketMonitor {
    state: RwLock<HashMap<String, SymbolState>>,
    latest: RwLock<HashMap<String, SignalCheckResult>>,
    rebound: OversoldReboundDetector,
    buy_threshold: f64,
    sell_threshold: f64,
    cooldown_minutes: i64,
}

impl MarketMonitor {
    pub fn new(buy_threshold: f64, sell_threshold: f64, cooldown_minutes: i64) -> Self {
        Self {
            state: RwLock::new(HashMap::new()),
            latest: RwLock::new(HashMap::new()),
            rebound: OversoldReboundDetector::new(),
            buy_threshold,
            sell_threshold,
            cooldown_minutes,
        }
    }

    /// The most recent `signal_for` result computed for `symbol`, if any.
    /// This is how the orchestrator's cycle consumes C3's output: C3 runs
    /// its own tick (`monitor_tick_seconds`) independent of C9's cadence,
    /// and C9 just reads whatever is cached here.
    pub fn cached_signal(&self, symbol: &str) -> Option<SignalCheckResult> {
        self.latest.read().get(symbol).cloned()
    }

    /// Evaluate the full C3 pipeline for `symbol` given its closed,
    /// oldest-first 5m candles, and cache the result for `cached_signal`.
    /// `now` is injected so tests (and P2's determinism property) don't
    /// depend on wall-clock time.
    pub fn signal_for(&self, symbol: &str, candles: &[Candle], now: DateTime<Utc>) -> SignalCheckResult {
        let result = self.compute_signal(symbol, candles, now);
        self.latest.write().insert(symbol.to_string(), result.clone());
        result
    }

    fn compute_signal(&self, symbol: &str, candles: &[Candle], now: DateTime<Utc>) -> SignalCheckResult {
        let current = compute_snapshot(candles);

        if current.unready {
            return SignalCheckResult {
                should_trade: false,
                signal_type: SignalType::Hold,
                trade_score: 0.0,
                fused_confidence: 0.5,
                triggers: Vec::new(),
                indicator_snapshot: current,
                message: "indicator unready".to_string(),
            };
        }

        let prev = {
            let mut state = self.state.write();
            let entry = state.entry(symbol.to_string()).or_default();
            let prev = entry.prev_snapshot.clone().unwrap_or_else(|| current.clone());
            entry.prev_snapshot = Some(current.clone());
            prev
        };

        self.rebound.observe(symbol, &current);
        let rebound = self.rebound.check_rebound(symbol, &prev, &current);

        let score_vector = score::score(&current);
        let trade_score = score_vector.trade_score;
        let alpha_confidence = (trade_score + 1.0) / 2.0;

        let gate_passes = current.passes_low_price_gate();
        let rebound_buy = rebound.signal_type == ReboundSignal::Buy;

        let (mut signal_type, mut fused_confidence, mut triggers, mut message) =
            self.fuse(trade_score, gate_passes, rebound_buy, alpha_confidence, rebound.confidence);

        triggers.extend(rebound.triggers.clone());
        if rebound_buy {
            self.rebound.consume(symbol);
        }

        // Cooldown filter -- read-only here; the orchestrator stamps
        // last_fire only after a decision survives execution.
        if matches!(signal_type, SignalType::Buy | SignalType::Sell) {
            let side = if signal_type == SignalType::Buy { Side::Buy } else { Side::Sell };
            let state = self.state.read();
            if let Some(entry) = state.get(symbol) {
                if let Some(last) = entry.last_fire.get(&side) {
                    let elapsed = now.signed_duration_since(*last).num_minutes();
                    if elapsed < self.cooldown_minutes {
                        debug!(symbol, ?side, elapsed, "cooldown active, demoting to HOLD");
                        signal_type = SignalType::Hold;
                        fused_confidence = 0.5;
                        message = "cooldown".to_string();
                        triggers.clear();
                    }
                }
            }
        }

        let should_trade = matches!(signal_type, SignalType::Buy | SignalType::Sell);

        SignalCheckResult {
            should_trade,
            signal_type,
            trade_score,
            fused_confidence,
            triggers,
            indicator_snapshot: current,
            message,
        }
    }

    /// The fusion table from §4.3, expressed as a pure function of its
    /// inputs (keeps P2 -- determinism -- intact).
    fn fuse(
        &self,
        trade_score: f64,
        gate_passes: bool,
        rebound_buy: bool,
        alpha_confidence: f64,
        rebound_confidence: f64,
    ) -> (SignalType, f64, Vec<String>, String) {
        let fused_rebound_confidence = 0.4 * alpha_confidence + 0.6 * rebound_confidence;

        if trade_score >= self.buy_threshold {
            if gate_passes {
                return (
                    SignalType::Buy,
                    alpha_confidence,
                    vec!["momentum buy".to_string()],
                    "BUY: trade_score above threshold".to_string(),
                );
            }
            return (
                SignalType::Hold,
                alpha_confidence,
                Vec::new(),
                "low-price gate failed".to_string(),
            );
        }

        if trade_score <= self.sell_threshold {
            if gate_passes && rebound_buy {
                return (
                    SignalType::Buy,
                    fused_rebound_confidence,
                    vec!["reversal buy via rebound".to_string()],
                    "BUY (reversal): rebound overrides a deep-negative score".to_string(),
                );
            }
            return (
                SignalType::Sell,
                alpha_confidence,
                vec!["momentum sell".to_string()],
                "SELL: trade_score below threshold".to_string(),
            );
        }

        if rebound_buy && gate_passes {
            return (
                SignalType::Buy,
                fused_rebound_confidence,
                vec!["rebound buy".to_string()],
                "BUY (rebound): oversold rebound detected in neutral zone".to_string(),
            );
        }

        (
            SignalType::Hold,
            alpha_confidence,
            Vec::new(),
            "no signal".to_string(),
        )
    }

    /// Arm the cooldown for `(symbol, side)` at `now`. Called by the
    /// orchestrator only after a decision has actually been executed.
    pub fn record_execution(&self, symbol: &str, side: Side, now: DateTime<Utc>) {
        let mut state = self.state.write();
        let entry = state.entry(symbol.to_string()).or_default();
        entry.last_fire.insert(side, now);
    }
}
