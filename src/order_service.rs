// =============================================================================
// Order Service (C8)
// =============================================================================
//
// Thin, idempotent wrapper over `ExchangeClient` that normalizes every order
// outcome into one `OrderResult` shape the orchestrator can branch on without
// caring which exchange call produced it.
// =============================================================================

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::BotError;
use crate::exchange::{ExchangeClient, ExchangeOrder, OrderSide};

/// The fixed status vocabulary the rest of this crate reasons about.
/// Exchange-specific strings ("FILLED", "PARTIALLY_FILLED", "NEW", ...) are
/// normalized into this before any success/rejection/cancellation logic
/// touches them, so a drift in the exchange's own vocabulary can't silently
/// change behavior here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Open,
    Closed,
    Canceled,
    Rejected,
    Expired,
    Unknown,
}

fn normalize_status(raw: &str) -> OrderStatus {
    match raw.to_ascii_uppercase().as_str() {
        "NEW" | "PARTIALLY_FILLED" | "PENDING" => OrderStatus::Open,
        "FILLED" => OrderStatus::Closed,
        "CANCELED" | "CANCELLED" | "PENDING_CANCEL" => OrderStatus::Canceled,
        "REJECTED" => OrderStatus::Rejected,
        "EXPIRED" => OrderStatus::Expired,
        _ => OrderStatus::Unknown,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResult {
    pub order_id: Option<String>,
    pub status: OrderStatus,
    pub requested_amount: f64,
    pub filled_amount: f64,
    pub remaining_amount: f64,
    pub average_price: f64,
    pub error_message: Option<String>,
    pub error_code: Option<String>,
}

impl OrderResult {
    pub fn is_rejected(&self) -> bool {
        self.error_message.is_some() || self.status == OrderStatus::Rejected
    }

    pub fn is_partially_filled(&self) -> bool {
        !self.is_rejected() && self.filled_amount > 0.0 && self.remaining_amount > 0.0
    }

    pub fn is_fully_filled(&self) -> bool {
        !self.is_rejected() && self.remaining_amount <= f64::EPSILON && self.filled_amount > 0.0
    }

    /// `filled_amount > 0 ∧ status ∉ {rejected, canceled}` -- a canceled
    /// order with a partial fill is not a success even though it moved some
    /// quantity.
    pub fn is_success(&self) -> bool {
        self.filled_amount > 0.0 && !matches!(self.status, OrderStatus::Rejected | OrderStatus::Canceled)
    }

    fn from_exchange_order(order: ExchangeOrder) -> Self {
        let remaining = (order.orig_qty - order.executed_qty).max(0.0);
        Self {
            order_id: Some(order.order_id),
            status: normalize_status(&order.status),
            requested_amount: order.orig_qty,
            filled_amount: order.executed_qty,
            remaining_amount: remaining,
            average_price: order.avg_price,
            error_message: None,
            error_code: None,
        }
    }

    fn from_error(requested_amount: f64, err: &BotError) -> Self {
        let (message, code) = match err {
            BotError::OrderRejected { message, code } => (message.clone(), code.clone()),
            other => (other.to_string(), None),
        };
        Self {
            order_id: None,
            status: OrderStatus::Rejected,
            requested_amount,
            filled_amount: 0.0,
            remaining_amount: requested_amount,
            average_price: 0.0,
            error_message: Some(message),
            error_code: code,
        }
    }
}

pub struct OrderService<'a> {
    exchange: &'a dyn ExchangeClient,
}

impl<'a> OrderService<'a> {
    pub fn new(exchange: &'a dyn ExchangeClient) -> Self {
        Self { exchange }
    }

    pub async fn create_order(&self, symbol: &str, side: OrderSide, quantity: f64) -> OrderResult {
        match self.exchange.place_market_order(symbol, side, quantity).await {
            Ok(order) => {
                info!(symbol, %side, quantity, order_id = %order.order_id, "market order placed");
                OrderResult::from_exchange_order(order)
            }
            Err(e) => {
                warn!(symbol, %side, quantity, error = %e, "market order rejected");
                OrderResult::from_error(quantity, &e)
            }
        }
    }

    pub async fn create_stop_loss(
        &self,
        symbol: &str,
        side: OrderSide,
        stop_price: f64,
        quantity: f64,
    ) -> OrderResult {
        match self
            .exchange
            .place_stop_market_order(symbol, side, stop_price, quantity, true)
            .await
        {
            Ok(order) => {
                info!(symbol, %side, stop_price, quantity, order_id = %order.order_id, "stop-loss placed");
                OrderResult::from_exchange_order(order)
            }
            Err(e) => {
                warn!(symbol, %side, stop_price, quantity, error = %e, "stop-loss rejected");
                OrderResult::from_error(quantity, &e)
            }
        }
    }

    pub async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), BotError> {
        self.exchange.cancel_order(symbol, order_id).await
    }

    pub async fn get_order_status(&self, symbol: &str, order_id: &str) -> OrderResult {
        match self.exchange.get_order_status(symbol, order_id).await {
            Ok(order) => OrderResult::from_exchange_order(order),
            Err(e) => {
                warn!(symbol, order_id, error = %e, "order status lookup failed");
                OrderResult::from_error(0.0, &e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::exchange::PositionInfo;
    use crate::market_data::Candle;

    struct StubExchange {
        order_response: Result<ExchangeOrder, BotError>,
    }

    #[async_trait]
    impl ExchangeClient for StubExchange {
        async fn fetch_klines(&self, _s: &str, _i: &str, _l: u32) -> Result<Vec<Candle>, BotError> {
            Ok(Vec::new())
        }
        async fn fetch_balance(&self) -> Result<f64, BotError> {
            Ok(10_000.0)
        }
        async fn fetch_position(&self, symbol: &str) -> Result<PositionInfo, BotError> {
            Ok(PositionInfo {
                symbol: symbol.to_string(),
                position_amt: 0.0,
                entry_price: 0.0,
                unrealized_pnl: 0.0,
                leverage: 1,
            })
        }
        async fn set_leverage(&self, _s: &str, _l: u32) -> Result<(), BotError> {
            Ok(())
        }
        async fn place_market_order(&self, _s: &str, _side: OrderSide, _q: f64) -> Result<ExchangeOrder, BotError> {
            self.order_response.clone()
        }
        async fn place_stop_market_order(
            &self,
            _s: &str,
            _side: OrderSide,
            _sp: f64,
            _q: f64,
            _ro: bool,
        ) -> Result<ExchangeOrder, BotError> {
            self.order_response.clone()
        }
        async fn cancel_order(&self, _s: &str, _id: &str) -> Result<(), BotError> {
            Ok(())
        }
        async fn get_order_status(&self, _s: &str, _id: &str) -> Result<ExchangeOrder, BotError> {
            self.order_response.clone()
        }
    }

    fn filled_order() -> ExchangeOrder {
        ExchangeOrder {
            order_id: "1".to_string(),
            status: "FILLED".to_string(),
            side: OrderSide::Buy,
            orig_qty: 1.0,
            executed_qty: 1.0,
            avg_price: 100.0,
            reduce_only: false,
        }
    }

    #[tokio::test]
    async fn create_order_success_maps_filled() {
        let exchange = StubExchange { order_response: Ok(filled_order()) };
        let service = OrderService::new(&exchange);
        let result = service.create_order("BTCUSDT", OrderSide::Buy, 1.0).await;
        assert!(result.is_fully_filled());
        assert!(!result.is_rejected());
    }

    #[tokio::test]
    async fn create_order_rejection_maps_error() {
        let exchange = StubExchange {
            order_response: Err(BotError::OrderRejected {
                message: "insufficient margin".to_string(),
                code: Some("-2019".to_string()),
            }),
        };
        let service = OrderService::new(&exchange);
        let result = service.create_order("BTCUSDT", OrderSide::Buy, 1.0).await;
        assert!(result.is_rejected());
        assert_eq!(result.error_code.as_deref(), Some("-2019"));
    }

    #[tokio::test]
    async fn partial_fill_is_detected() {
        let mut order = filled_order();
        order.executed_qty = 0.4;
        let exchange = StubExchange { order_response: Ok(order) };
        let service = OrderService::new(&exchange);
        let result = service.create_order("BTCUSDT", OrderSide::Buy, 1.0).await;
        assert!(result.is_partially_filled());
        assert!(!result.is_fully_filled());
    }
}
