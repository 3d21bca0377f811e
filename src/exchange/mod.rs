// =============================================================================
// Exchange Adapter (C8 collaborator / §6 external interface)
// =============================================================================
//
// One async trait collapsing every outbound call the order service and
// position manager need onto the exchange: klines, position state, and
// order placement/cancellation/status. `binance` is the only concrete
// adapter shipped with this core; a paper-trading adapter is a natural
// second implementation but out of scope here.
// =============================================================================

pub mod binance;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::BotError;
use crate::market_data::Candle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// The exchange's view of an order, regardless of what triggered it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeOrder {
    pub order_id: String,
    pub status: String,
    pub side: OrderSide,
    pub orig_qty: f64,
    pub executed_qty: f64,
    pub avg_price: f64,
    pub reduce_only: bool,
}

/// The exchange's view of an open futures position for one symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionInfo {
    pub symbol: String,
    /// Signed: positive is long, negative is short, zero is flat.
    pub position_amt: f64,
    pub entry_price: f64,
    pub unrealized_pnl: f64,
    pub leverage: u32,
}

impl PositionInfo {
    pub fn is_flat(&self) -> bool {
        self.position_amt.abs() < f64::EPSILON
    }
}

#[async_trait]
pub trait ExchangeClient: Send + Sync {
    async fn fetch_klines(&self, symbol: &str, interval: &str, limit: u32) -> Result<Vec<Candle>, BotError>;

    /// Free USDT margin balance available for new positions.
    async fn fetch_balance(&self) -> Result<f64, BotError>;

    async fn fetch_position(&self, symbol: &str) -> Result<PositionInfo, BotError>;

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), BotError>;

    async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
    ) -> Result<ExchangeOrder, BotError>;

    async fn place_stop_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        stop_price: f64,
        quantity: f64,
        reduce_only: bool,
    ) -> Result<ExchangeOrder, BotError>;

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), BotError>;

    async fn get_order_status(&self, symbol: &str, order_id: &str) -> Result<ExchangeOrder, BotError>;
}
