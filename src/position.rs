// =============================================================================
// Position Manager (C7)
// =============================================================================
//
// In-memory mirror of the exchange's authoritative long-only position, plus
// the ratcheting stop-loss policy. No TP1/TP2 partial-close machinery here --
// a single trailing protective stop is the whole exit strategy.
// =============================================================================

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::BotError;
use crate::exchange::PositionInfo;

/// Which side the exchange reports the position on. This engine only ever
/// *opens* longs, but the exchange's authoritative state is read back
/// unconditionally, so a short must still be representable -- see
/// `BotError::InvariantViolation`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionSide {
    Long,
    Short,
}

fn default_loss_pct() -> f64 {
    0.005
}
fn default_profit_pct() -> f64 {
    0.01
}
fn default_tolerance_pct() -> f64 {
    0.001
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopPolicy {
    #[serde(default = "default_loss_pct")]
    pub loss_pct: f64,
    #[serde(default = "default_profit_pct")]
    pub profit_pct: f64,
    #[serde(default = "default_tolerance_pct")]
    pub tolerance_pct: f64,
}

impl Default for StopPolicy {
    fn default() -> Self {
        Self {
            loss_pct: default_loss_pct(),
            profit_pct: default_profit_pct(),
            tolerance_pct: default_tolerance_pct(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalPosition {
    pub symbol: String,
    pub side: PositionSide,
    pub entry_price: f64,
    pub quantity: f64,
    pub leverage: u32,
    pub current_stop: Option<f64>,
}

#[derive(Default)]
struct Inner {
    position: Option<LocalPosition>,
    stop_order_id: Option<String>,
}

pub struct PositionManager {
    inner: RwLock<Inner>,
    policy: StopPolicy,
}

impl PositionManager {
    pub fn new(policy: StopPolicy) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            policy,
        }
    }

    /// Replace local state from the exchange's authoritative view. A flat
    /// (`is_flat`) position clears local state entirely.
    ///
    /// A short (`position_amt < 0`) is still recorded -- as `PositionSide::
    /// Short` -- so it remains trackable and closeable, but this engine is
    /// long-only by design, so observing one is a structural invariant
    /// violation (§3/P8): it is surfaced via `Err` so the orchestrator can
    /// restrict itself to reducing orders until the position clears.
    pub fn update_from_exchange(&self, raw: Option<&PositionInfo>) -> Result<(), BotError> {
        let mut inner = self.inner.write();
        match raw {
            Some(p) if !p.is_flat() => {
                let current_stop = inner.position.as_ref().and_then(|pos| pos.current_stop);
                let side = if p.position_amt < 0.0 { PositionSide::Short } else { PositionSide::Long };
                inner.position = Some(LocalPosition {
                    symbol: p.symbol.clone(),
                    side,
                    entry_price: p.entry_price,
                    quantity: p.position_amt.abs(),
                    leverage: p.leverage,
                    current_stop,
                });
                if side == PositionSide::Short {
                    return Err(BotError::InvariantViolation(format!(
                        "exchange reports a short position on {} ({} contracts); this engine is long-only",
                        p.symbol, p.position_amt
                    )));
                }
                Ok(())
            }
            _ => {
                inner.position = None;
                inner.stop_order_id = None;
                Ok(())
            }
        }
    }

    /// True when the current local position is a short -- the orchestrator
    /// must restrict itself to reducing (closing) orders in this state.
    pub fn requires_reduce_only(&self) -> bool {
        matches!(
            self.inner.read().position.as_ref().map(|p| p.side),
            Some(PositionSide::Short)
        )
    }

    pub fn has_position(&self) -> bool {
        self.inner.read().position.is_some()
    }

    pub fn position(&self) -> Option<LocalPosition> {
        self.inner.read().position.clone()
    }

    pub fn stop_order_id(&self) -> Option<String> {
        self.inner.read().stop_order_id.clone()
    }

    pub fn set_stop_order(&self, order_id: Option<String>) {
        self.inner.write().stop_order_id = order_id;
    }

    pub fn record_stop_price(&self, stop: f64) {
        if let Some(pos) = self.inner.write().position.as_mut() {
            pos.current_stop = Some(stop);
        }
    }

    /// The ratcheting long-only stop policy from the position manager's
    /// contract: once raised, the stop never regresses.
    pub fn calculate_stop_price(&self, entry_price: f64, current_price: f64, old_stop: Option<f64>) -> f64 {
        let initial_floor = entry_price * (1.0 - self.policy.loss_pct);

        let candidate = if current_price < entry_price {
            initial_floor
        } else {
            (current_price * (1.0 - self.policy.profit_pct)).max(initial_floor)
        };

        match old_stop {
            Some(old) if old > 0.0 => candidate.max(old),
            _ => candidate,
        }
    }

    /// Whether a freshly computed `new_stop` differs enough from `old_stop`
    /// to warrant a cancel+replace on the exchange.
    pub fn should_replace_stop(&self, new_stop: f64, old_stop: f64) -> bool {
        if old_stop <= 0.0 {
            return true;
        }
        ((new_stop - old_stop).abs() / old_stop) >= self.policy.tolerance_pct
    }

    pub fn log_stop_loss_info(&self, current_price: f64, new_stop: f64) {
        info!(current_price, new_stop, "stop-loss recalculated");
    }
}
