// =============================================================================
// Trading Bot Orchestrator (C9)
// =============================================================================
//
// Owns C3/C6/C7/C8. Sole writer of position state and sole caller of C8's
// write operations; C3 stays read-only with respect to position and orders.
// Every branch logs one structured `tracing::info!` carrying cycle_id,
// symbol, signal_type, and action_taken -- the "emitted signal" record.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::advisor::{advise_with_timeout, Advisor};
use crate::config::RuntimeConfig;
use crate::error::BotError;
use crate::exchange::{ExchangeClient, OrderSide};
use crate::monitor::{MarketMonitor, Side, SignalType};
use crate::order_service::OrderService;
use crate::position::{PositionManager, PositionSide};
use crate::store::{Timeframe, TieredStore};
use crate::validator::SignalValidator;

pub enum ActionTaken {
    Open,
    UpdateStop,
    Close,
    Noop,
    SkippedCooldown,
    SkippedGate,
    SkippedBalance,
    SkippedExchangeError,
}

impl std::fmt::Display for ActionTaken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Open => "open",
            Self::UpdateStop => "update_stop",
            Self::Close => "close",
            Self::Noop => "noop",
            Self::SkippedCooldown => "skipped_cooldown",
            Self::SkippedGate => "skipped_gate",
            Self::SkippedBalance => "skipped_balance",
            Self::SkippedExchangeError => "skipped_exchange_error",
        };
        write!(f, "{s}")
    }
}

pub struct Orchestrator {
    exchange: Arc<dyn ExchangeClient>,
    store: Arc<TieredStore>,
    monitor: Arc<MarketMonitor>,
    validator: SignalValidator,
    advisor: Arc<dyn Advisor>,
    positions: PositionManager,
    config: RuntimeConfig,
    cycle_counter: AtomicU64,
}

impl Orchestrator {
    pub fn new(
        exchange: Arc<dyn ExchangeClient>,
        store: Arc<TieredStore>,
        monitor: Arc<MarketMonitor>,
        advisor: Arc<dyn Advisor>,
        positions: PositionManager,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            exchange,
            store,
            monitor,
            validator: SignalValidator::new(config.scoring.validator_min_confidence),
            advisor,
            positions,
            config,
            cycle_counter: AtomicU64::new(0),
        }
    }

    pub async fn run_cycle(&self) {
        let cycle_id = self.cycle_counter.fetch_add(1, Ordering::SeqCst);
        let symbol = self.config.exchange.symbol.clone();

        let tf: Timeframe = match self.config.store.working_timeframe.parse() {
            Ok(tf) => tf,
            Err(e) => {
                error!(cycle_id, symbol, error = %e, "invalid working_timeframe in config, skipping cycle");
                return;
            }
        };

        let now = Utc::now();

        // C3 runs its own independent tick; C9 just reads whatever it last
        // cached. Only on a cold start (no tick has landed yet) do we fall
        // back to computing it inline here.
        let signal_result = match self.monitor.cached_signal(&symbol) {
            Some(cached) => cached,
            None => {
                warn!(cycle_id, symbol, "no cached monitor signal yet, computing inline as a one-time bootstrap");
                let mut candles = self.store.get(&symbol, tf, 2016).await;
                candles.reverse(); // store.get is newest-first; the monitor wants oldest-first
                self.monitor.signal_for(&symbol, &candles, now)
            }
        };

        let position = match self.exchange.fetch_position(&symbol).await {
            Ok(p) => Some(p),
            Err(e) => {
                warn!(cycle_id, symbol, error = %e, "failed to fetch position, skipping cycle");
                self.emit(cycle_id, &symbol, &signal_result.signal_type, &ActionTaken::SkippedExchangeError, 0.0);
                return;
            }
        };

        if let Err(e) = self.positions.update_from_exchange(position.as_ref()) {
            error!(cycle_id, symbol, error = %e, "position invariant violated, entering reduce-only defensive mode");
        }

        if self.positions.requires_reduce_only() {
            let current_price = signal_result.indicator_snapshot.current_price;
            let action = self.close_position(cycle_id, &symbol, current_price).await;
            if matches!(action, ActionTaken::Close) {
                self.monitor.record_execution(&symbol, Side::Sell, now);
            }
            self.emit(cycle_id, &symbol, &signal_result.signal_type, &action, current_price);
            return;
        }

        let mut effective_signal = signal_result.signal_type;

        // The AI advisor is consulted only when the fused confidence doesn't
        // already clear the strong-signal bypass.
        if signal_result.fused_confidence < self.config.scoring.strong_signal {
            let validation = self.validator.validate(&signal_result);
            if let Some(advice) = advise_with_timeout(
                &self.advisor,
                &signal_result.indicator_snapshot,
                &validation,
                Duration::from_secs(self.config.advisor_timeout_seconds),
            )
            .await
            {
                effective_signal = advice.signal;
            } else if !validation.passed {
                effective_signal = SignalType::Hold;
            }
        }

        let current_price = signal_result.indicator_snapshot.current_price;
        let has_position = self.positions.has_position();

        let action = match (effective_signal, has_position) {
            (SignalType::Buy, false) => self.open_position(cycle_id, &symbol, current_price).await,
            (SignalType::Buy, true) => self.update_stop_loss(cycle_id, &symbol, current_price).await,
            (SignalType::Hold, true) => self.update_stop_loss(cycle_id, &symbol, current_price).await,
            (SignalType::Hold, false) if signal_result.message == "cooldown" => ActionTaken::SkippedCooldown,
            (SignalType::Hold, false) if signal_result.message == "low-price gate failed" => ActionTaken::SkippedGate,
            (SignalType::Hold, false) => ActionTaken::Noop,
            (SignalType::Sell, true) => self.close_position(cycle_id, &symbol, current_price).await,
            (SignalType::Sell, false) => ActionTaken::Noop,
        };

        if matches!(action, ActionTaken::Open | ActionTaken::Close) {
            let side = if matches!(action, ActionTaken::Open) { Side::Buy } else { Side::Sell };
            self.monitor.record_execution(&symbol, side, now);
        }

        self.emit(cycle_id, &symbol, &effective_signal, &action, current_price);
    }

    async fn open_position(&self, cycle_id: u64, symbol: &str, price: f64) -> ActionTaken {
        let free_usdt = match self.exchange.fetch_balance().await {
            Ok(b) => b,
            Err(e) => {
                warn!(cycle_id, symbol, error = %e, "balance fetch failed, skipping open");
                return ActionTaken::SkippedExchangeError;
            }
        };

        let safe_balance = free_usdt * self.config.safety.safe_balance_fraction;
        let leverage = self.config.exchange.leverage as f64;
        let max_contracts = ((safe_balance * leverage) / price * 10_000.0).floor() / 10_000.0;

        if max_contracts < self.config.safety.min_contract {
            warn!(cycle_id, symbol, free_usdt, max_contracts, "insufficient balance to open position");
            return ActionTaken::SkippedBalance;
        }

        let service = OrderService::new(&self.exchange);
        let order = service.create_order(symbol, OrderSide::Buy, max_contracts).await;

        if !order.is_success() {
            error!(cycle_id, symbol, error = ?order.error_message, "open-position market order failed");
            return ActionTaken::SkippedExchangeError;
        }

        let filled = order.filled_amount;
        let initial_stop = price * (1.0 - self.config.stop_policy.loss_pct);

        let stop_result = service.create_stop_loss(symbol, OrderSide::Sell, initial_stop, filled).await;
        if !stop_result.is_success() {
            error!(
                cycle_id, symbol,
                "position opened but stop-loss creation failed; position unprotected until next cycle"
            );
        } else {
            self.positions.set_stop_order(stop_result.order_id.clone());
            self.positions.record_stop_price(initial_stop);
        }

        info!(cycle_id, symbol, filled, avg_price = order.average_price, "position opened");
        ActionTaken::Open
    }

    async fn update_stop_loss(&self, cycle_id: u64, symbol: &str, current_price: f64) -> ActionTaken {
        let Some(pos) = self.positions.position() else {
            return ActionTaken::Noop;
        };

        let old_stop = pos.current_stop.unwrap_or_else(|| {
            self.positions
                .calculate_stop_price(pos.entry_price, pos.entry_price, None)
        });
        let new_stop = self
            .positions
            .calculate_stop_price(pos.entry_price, current_price, Some(old_stop));

        if !self.positions.should_replace_stop(new_stop, old_stop) {
            self.positions.log_stop_loss_info(current_price, old_stop);
            return ActionTaken::Noop;
        }

        let service = OrderService::new(&self.exchange);
        if let Some(old_id) = self.positions.stop_order_id() {
            if let Err(e) = service.cancel_order(symbol, &old_id).await {
                warn!(cycle_id, symbol, error = %e, "failed to cancel prior stop order, proceeding anyway");
            }
        }

        let stop_result = service.create_stop_loss(symbol, OrderSide::Sell, new_stop, pos.quantity).await;
        if !stop_result.is_success() {
            error!(cycle_id, symbol, new_stop, "stop-loss replacement rejected, retrying next cycle");
            return ActionTaken::SkippedExchangeError;
        }

        self.positions.set_stop_order(stop_result.order_id.clone());
        self.positions.record_stop_price(new_stop);
        self.positions.log_stop_loss_info(current_price, new_stop);

        info!(cycle_id, symbol, old_stop, new_stop, "stop-loss updated");
        ActionTaken::UpdateStop
    }

    async fn close_position(&self, cycle_id: u64, symbol: &str, _current_price: f64) -> ActionTaken {
        let Some(pos) = self.positions.position() else {
            return ActionTaken::Noop;
        };

        // Closing is the opposite side of whatever the exchange reports:
        // sell to close a long, buy to close a short (reduce-only/defensive
        // mode, §3/P8).
        let closing_side = match pos.side {
            PositionSide::Long => OrderSide::Sell,
            PositionSide::Short => OrderSide::Buy,
        };

        let service = OrderService::new(&self.exchange);
        let close_order = service.create_order(symbol, closing_side, pos.quantity).await;
        if !close_order.is_success() {
            error!(cycle_id, symbol, "close-position market order failed, will retry next cycle");
            return ActionTaken::SkippedExchangeError;
        }

        if let Some(stop_id) = self.positions.stop_order_id() {
            if let Err(e) = service.cancel_order(symbol, &stop_id).await {
                warn!(cycle_id, symbol, error = %e, "failed to cancel stop order on close, tolerating");
            }
        }

        let _ = self.positions.update_from_exchange(None);
        info!(cycle_id, symbol, filled = close_order.filled_amount, "position closed");
        ActionTaken::Close
    }

    fn emit(&self, cycle_id: u64, symbol: &str, signal_type: &SignalType, action: &ActionTaken, price: f64) {
        info!(
            cycle_id,
            symbol,
            signal_type = ?signal_type,
            action_taken = %action,
            price,
            position_side = if self.positions.has_position() { "long" } else { "flat" },
            emitted_signal_id = %Uuid::new_v4(),
            "cycle complete"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advisor::RuleBasedAdvisor;
    use crate::exchange::{ExchangeOrder, PositionInfo};
    use crate::market_data::Candle;
    use crate::position::StopPolicy;
    use crate::store::{Timeframe, TieredStore};
    use async_trait::async_trait;

    struct StubExchange {
        balance: f64,
        position: Option<PositionInfo>,
        order_ok: bool,
    }

    #[async_trait]
    impl ExchangeClient for StubExchange {
        async fn fetch_klines(&self, _s: &str, _i: &str, _l: u32) -> Result<Vec<Candle>, BotError> {
            Ok(Vec::new())
        }
        async fn fetch_balance(&self) -> Result<f64, BotError> {
            Ok(self.balance)
        }
        async fn fetch_position(&self, symbol: &str) -> Result<PositionInfo, BotError> {
            Ok(self.position.clone().unwrap_or(PositionInfo {
                symbol: symbol.to_string(),
                position_amt: 0.0,
                entry_price: 0.0,
                unrealized_pnl: 0.0,
                leverage: 1,
            }))
        }
        async fn set_leverage(&self, _s: &str, _l: u32) -> Result<(), BotError> {
            Ok(())
        }
        async fn place_market_order(&self, _s: &str, side: OrderSide, q: f64) -> Result<ExchangeOrder, BotError> {
            if self.order_ok {
                Ok(ExchangeOrder {
                    order_id: "1".to_string(),
                    status: "FILLED".to_string(),
                    side,
                    orig_qty: q,
                    executed_qty: q,
                    avg_price: 100.0,
                    reduce_only: false,
                })
            } else {
                Err(BotError::OrderRejected { message: "no".to_string(), code: None })
            }
        }
        async fn place_stop_market_order(
            &self,
            _s: &str,
            side: OrderSide,
            _sp: f64,
            q: f64,
            _ro: bool,
        ) -> Result<ExchangeOrder, BotError> {
            Ok(ExchangeOrder {
                order_id: "2".to_string(),
                status: "NEW".to_string(),
                side,
                orig_qty: q,
                executed_qty: 0.0,
                avg_price: 0.0,
                reduce_only: true,
            })
        }
        async fn cancel_order(&self, _s: &str, _id: &str) -> Result<(), BotError> {
            Ok(())
        }
        async fn get_order_status(&self, _s: &str, _id: &str) -> Result<ExchangeOrder, BotError> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn skips_open_when_balance_insufficient() {
        let exchange: Arc<dyn ExchangeClient> =
            Arc::new(StubExchange { balance: 0.0, position: None, order_ok: true });
        let store = Arc::new(TieredStore::new());
        let monitor = Arc::new(MarketMonitor::new(-2.0, 2.0, 15)); // never fires real thresholds here
        let advisor: Arc<dyn Advisor> = Arc::new(RuleBasedAdvisor);
        let config = RuntimeConfig::default();
        let positions = PositionManager::new(StopPolicy::default());

        let orchestrator = Orchestrator::new(exchange, store, monitor, advisor, positions, config);
        let action = orchestrator.open_position(0, "BTCUSDT", 100.0).await;
        assert!(matches!(action, ActionTaken::SkippedBalance));
    }

    #[tokio::test]
    async fn noop_when_hold_and_flat() {
        let exchange: Arc<dyn ExchangeClient> =
            Arc::new(StubExchange { balance: 10_000.0, position: None, order_ok: true });
        let store = Arc::new(TieredStore::new());
        let monitor = Arc::new(MarketMonitor::new(0.20, -0.20, 15));
        let advisor: Arc<dyn Advisor> = Arc::new(RuleBasedAdvisor);
        let config = RuntimeConfig::default();
        let positions = PositionManager::new(StopPolicy::default());

        let orchestrator = Orchestrator::new(exchange, store, monitor, advisor, positions, config);
        orchestrator.run_cycle().await;
        assert!(!orchestrator.positions.has_position());
    }
}
