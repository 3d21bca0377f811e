// =============================================================================
// perpfusion-bot — Main Entry Point
// =============================================================================
//
// Wires C1-C9 together: ingest market data on its own loop, run the monitor
// and orchestrator on the scheduler's cadence. The orchestrator is the sole
// writer of position/order state; the ingestion loop is read-only with
// respect to it.
// =============================================================================

mod advisor;
mod config;
mod error;
mod exchange;
mod indicators;
mod market_data;
mod monitor;
mod order_service;
mod orchestrator;
mod position;
mod rebound;
mod score;
mod scheduler;
mod store;
mod validator;

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::advisor::{Advisor, RuleBasedAdvisor};
use crate::config::RuntimeConfig;
use crate::exchange::binance::BinanceFuturesClient;
use crate::exchange::ExchangeClient;
use crate::monitor::MarketMonitor;
use crate::orchestrator::Orchestrator;
use crate::position::{PositionManager, StopPolicy};
use crate::scheduler::Scheduler;
use crate::store::{Timeframe, TieredStore, WarmColdStore};

const CONFIG_PATH: &str = "runtime_config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("perpfusion-bot starting up");

    let config = RuntimeConfig::load_or_default(CONFIG_PATH)?;

    info!(
        symbol = %config.exchange.symbol,
        leverage = config.exchange.leverage,
        timeframe = %config.store.working_timeframe,
        "configuration loaded"
    );

    // ── Exchange adapter ──────────────────────────────────────────────────
    let api_key = if config.exchange.api_key.is_empty() {
        std::env::var("EXCHANGE_API_KEY").unwrap_or_default()
    } else {
        config.exchange.api_key.clone()
    };
    let secret = if config.exchange.secret.is_empty() {
        std::env::var("EXCHANGE_SECRET").unwrap_or_default()
    } else {
        config.exchange.secret.clone()
    };
    let exchange: Arc<dyn ExchangeClient> = Arc::new(BinanceFuturesClient::new(api_key, secret));

    if let Err(e) = exchange.set_leverage(&config.exchange.symbol, config.exchange.leverage).await {
        warn!(error = %e, "failed to set leverage at startup, continuing with exchange default");
    }

    // ── Tiered store ──────────────────────────────────────────────────────
    let store = match WarmColdStore::connect(&config.store.warm_path).await {
        Ok(backend) => Arc::new(TieredStore::with_backend(backend)),
        Err(e) => {
            warn!(error = %e, "failed to open warm/cold store, running hot-tier only");
            Arc::new(TieredStore::new())
        }
    };

    let working_tf: Timeframe = config
        .store
        .working_timeframe
        .parse()
        .unwrap_or(Timeframe::M5);

    // ── Market data ingestion loop ────────────────────────────────────────
    let ingest_exchange = exchange.clone();
    let ingest_store = store.clone();
    let ingest_symbol = config.exchange.symbol.clone();
    let ingest_tick = Duration::from_secs(config.monitor_tick_seconds);
    let ingest_interval = working_tf.to_string();
    tokio::spawn(async move {
        loop {
            match ingest_exchange
                .fetch_klines(&ingest_symbol, &ingest_interval, 1000)
                .await
            {
                Ok(candles) => {
                    for candle in candles {
                        if candle.is_closed {
                            ingest_store.append(&ingest_symbol, working_tf, candle).await;
                        }
                    }
                }
                Err(e) => {
                    error!(symbol = %ingest_symbol, error = %e, "failed to ingest market data, retrying next tick");
                }
            }
            tokio::time::sleep(ingest_tick).await;
        }
    });

    // Give the ingestion loop a head start before the first cycle evaluates.
    tokio::time::sleep(Duration::from_secs(5)).await;

    // ── Monitor, positions, advisor, orchestrator ────────────────────────
    let monitor = Arc::new(MarketMonitor::new(
        config.scoring.buy_threshold,
        config.scoring.sell_threshold,
        config.scoring.cooldown_minutes as i64,
    ));

    // C3 runs its full fused-score pipeline on its own independent tick,
    // separate from and faster than C9's cycle. The orchestrator only ever
    // reads the cached result via `MarketMonitor::cached_signal`.
    let monitor_tick_monitor = monitor.clone();
    let monitor_tick_store = store.clone();
    let monitor_tick_symbol = config.exchange.symbol.clone();
    let monitor_tick_interval = Duration::from_secs(config.monitor_tick_seconds);
    tokio::spawn(async move {
        loop {
            let mut candles = monitor_tick_store.get(&monitor_tick_symbol, working_tf, 2016).await;
            candles.reverse();
            let result = monitor_tick_monitor.signal_for(&monitor_tick_symbol, &candles, chrono::Utc::now());
            tracing::debug!(
                symbol = %monitor_tick_symbol,
                signal = ?result.signal_type,
                trade_score = result.trade_score,
                "monitor tick refreshed cached signal"
            );
            tokio::time::sleep(monitor_tick_interval).await;
        }
    });
    let positions = PositionManager::new(StopPolicy {
        loss_pct: config.stop_policy.loss_pct,
        profit_pct: config.stop_policy.profit_pct,
        tolerance_pct: config.stop_policy.tolerance_pct,
    });
    let advisor: Arc<dyn Advisor> = Arc::new(RuleBasedAdvisor);

    let orchestrator = Arc::new(Orchestrator::new(
        exchange.clone(),
        store.clone(),
        monitor.clone(),
        advisor,
        positions,
        config.clone(),
    ));

    let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);

    let scheduler = Scheduler::new(
        Duration::from_secs(config.cadence.cycle_interval_minutes * 60),
        Duration::from_secs(config.cadence.jitter_seconds),
    );

    let cycle_orchestrator = orchestrator.clone();
    let scheduler_handle = tokio::spawn(async move {
        scheduler
            .run(stop_rx, || {
                let orchestrator = cycle_orchestrator.clone();
                async move {
                    orchestrator.run_cycle().await;
                }
            })
            .await;
    });

    info!("all subsystems running, press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received, stopping gracefully");

    let _ = stop_tx.send(true);
    let _ = scheduler_handle.await;

    if let Err(e) = config.save(CONFIG_PATH) {
        error!(error = %e, "failed to save runtime config on shutdown");
    }

    info!("perpfusion-bot shut down complete");
    Ok(())
}
