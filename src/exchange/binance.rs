// =============================================================================
// Binance USDⓈ-M Futures adapter
// =============================================================================
//
// Same HMAC-SHA256 signing discipline as the spot client this is descended
// from: secret never logged, recvWindow tolerates clock drift, every signed
// request carries X-MBX-APIKEY.
// =============================================================================

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue};
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, instrument, warn};

use crate::error::BotError;
use crate::market_data::Candle;

use super::{ExchangeClient, ExchangeOrder, OrderSide, PositionInfo};

type HmacSha256 = Hmac<Sha256>;

const RECV_WINDOW: u64 = 5000;

#[derive(Clone)]
pub struct BinanceFuturesClient {
    api_key: String,
    secret: String,
    base_url: String,
    client: reqwest::Client,
}

impl BinanceFuturesClient {
    pub fn new(api_key: impl Into<String>, secret: impl Into<String>) -> Self {
        let api_key = api_key.into();
        let secret = secret.into();

        let mut default_headers = HeaderMap::new();
        if let Ok(val) = HeaderValue::from_str(&api_key) {
            default_headers.insert("X-MBX-APIKEY", val);
        }

        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        debug!("BinanceFuturesClient initialised (base_url=https://fapi.binance.com)");

        Self {
            api_key,
            secret,
            base_url: "https://fapi.binance.com".to_string(),
            client,
        }
    }

    fn sign(&self, query: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(self.secret.as_bytes()).expect("HMAC accepts any key size");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn timestamp_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before UNIX epoch")
            .as_millis() as u64
    }

    fn signed_query(&self, params: &str) -> String {
        let ts = Self::timestamp_ms();
        let base = if params.is_empty() {
            format!("timestamp={ts}&recvWindow={RECV_WINDOW}")
        } else {
            format!("{params}&timestamp={ts}&recvWindow={RECV_WINDOW}")
        };
        let sig = self.sign(&base);
        format!("{base}&signature={sig}")
    }

    fn parse_str_f64(val: &serde_json::Value) -> Result<f64, BotError> {
        if let Some(s) = val.as_str() {
            s.parse::<f64>()
                .map_err(|e| BotError::TransientExchangeError(format!("bad numeric field '{s}': {e}")))
        } else if let Some(n) = val.as_f64() {
            Ok(n)
        } else {
            Err(BotError::TransientExchangeError(format!(
                "expected string or number, got: {val}"
            )))
        }
    }

    async fn send_signed(
        &self,
        method: reqwest::Method,
        path: &str,
        params: &str,
    ) -> Result<serde_json::Value, BotError> {
        let qs = self.signed_query(params);
        let url = format!("{}{}?{}", self.base_url, path, qs);

        let resp = self
            .client
            .request(method, &url)
            .send()
            .await
            .map_err(|e| BotError::TransientExchangeError(format!("{path} request failed: {e}")))?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| BotError::TransientExchangeError(format!("{path} response parse failed: {e}")))?;

        if !status.is_success() {
            if let Some(code) = body.get("code").and_then(|v| v.as_i64()) {
                return Err(BotError::OrderRejected {
                    message: body
                        .get("msg")
                        .and_then(|v| v.as_str())
                        .unwrap_or("unknown error")
                        .to_string(),
                    code: Some(code.to_string()),
                });
            }
            return Err(BotError::TransientExchangeError(format!(
                "{path} returned {status}: {body}"
            )));
        }

        Ok(body)
    }

    fn order_from_json(body: &serde_json::Value) -> Result<ExchangeOrder, BotError> {
        let side = match body.get("side").and_then(|v| v.as_str()) {
            Some("BUY") => OrderSide::Buy,
            Some("SELL") => OrderSide::Sell,
            other => {
                return Err(BotError::TransientExchangeError(format!(
                    "unexpected order side: {other:?}"
                )))
            }
        };

        Ok(ExchangeOrder {
            order_id: body
                .get("orderId")
                .map(|v| v.to_string())
                .unwrap_or_default(),
            status: body
                .get("status")
                .and_then(|v| v.as_str())
                .unwrap_or("UNKNOWN")
                .to_string(),
            side,
            orig_qty: body
                .get("origQty")
                .map(Self::parse_str_f64)
                .transpose()?
                .unwrap_or(0.0),
            executed_qty: body
                .get("executedQty")
                .map(Self::parse_str_f64)
                .transpose()?
                .unwrap_or(0.0),
            avg_price: body
                .get("avgPrice")
                .map(Self::parse_str_f64)
                .transpose()?
                .unwrap_or(0.0),
            reduce_only: body
                .get("reduceOnly")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
        })
    }
}

#[async_trait]
impl ExchangeClient for BinanceFuturesClient {
    #[instrument(skip(self), name = "futures::fetch_klines")]
    async fn fetch_klines(&self, symbol: &str, interval: &str, limit: u32) -> Result<Vec<Candle>, BotError> {
        let url = format!(
            "{}/fapi/v1/klines?symbol={}&interval={}&limit={}",
            self.base_url, symbol, interval, limit
        );

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| BotError::TransientExchangeError(format!("klines request failed: {e}")))?;

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| BotError::TransientExchangeError(format!("klines parse failed: {e}")))?;

        let raw = body.as_array().ok_or_else(|| {
            BotError::TransientExchangeError("klines response is not an array".to_string())
        })?;

        let mut candles = Vec::with_capacity(raw.len());
        for entry in raw {
            let arr = match entry.as_array() {
                Some(a) if a.len() >= 11 => a,
                _ => {
                    warn!("skipping malformed futures kline entry");
                    continue;
                }
            };

            candles.push(Candle {
                open_time: arr[0].as_i64().unwrap_or(0),
                open: Self::parse_str_f64(&arr[1])?,
                high: Self::parse_str_f64(&arr[2])?,
                low: Self::parse_str_f64(&arr[3])?,
                close: Self::parse_str_f64(&arr[4])?,
                volume: Self::parse_str_f64(&arr[5])?,
                close_time: arr[6].as_i64().unwrap_or(0),
                quote_volume: Self::parse_str_f64(&arr[7])?,
                trades_count: arr[8].as_u64().unwrap_or(0),
                taker_buy_volume: Self::parse_str_f64(&arr[9])?,
                taker_buy_quote_volume: Self::parse_str_f64(&arr[10])?,
                is_closed: true,
            });
        }

        debug!(symbol, interval, count = candles.len(), "futures klines fetched");
        Ok(candles)
    }

    #[instrument(skip(self), name = "futures::fetch_balance")]
    async fn fetch_balance(&self) -> Result<f64, BotError> {
        let body = self.send_signed(reqwest::Method::GET, "/fapi/v2/balance", "").await?;

        let entries = body.as_array().ok_or_else(|| {
            BotError::TransientExchangeError("balance response is not an array".to_string())
        })?;

        for entry in entries {
            if entry.get("asset").and_then(|v| v.as_str()) == Some("USDT") {
                return entry
                    .get("availableBalance")
                    .map(Self::parse_str_f64)
                    .transpose()?
                    .ok_or_else(|| {
                        BotError::TransientExchangeError("missing availableBalance for USDT".to_string())
                    });
            }
        }

        warn!("no USDT entry in balance response, assuming 0.0");
        Ok(0.0)
    }

    #[instrument(skip(self), name = "futures::fetch_position")]
    async fn fetch_position(&self, symbol: &str) -> Result<PositionInfo, BotError> {
        let params = format!("symbol={symbol}");
        let body = self
            .send_signed(reqwest::Method::GET, "/fapi/v2/positionRisk", &params)
            .await?;

        let entry = body
            .as_array()
            .and_then(|arr| arr.first())
            .ok_or_else(|| BotError::TransientExchangeError("positionRisk returned no entries".to_string()))?;

        Ok(PositionInfo {
            symbol: symbol.to_string(),
            position_amt: entry
                .get("positionAmt")
                .map(Self::parse_str_f64)
                .transpose()?
                .unwrap_or(0.0),
            entry_price: entry
                .get("entryPrice")
                .map(Self::parse_str_f64)
                .transpose()?
                .unwrap_or(0.0),
            unrealized_pnl: entry
                .get("unRealizedProfit")
                .map(Self::parse_str_f64)
                .transpose()?
                .unwrap_or(0.0),
            leverage: entry
                .get("leverage")
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse().ok())
                .unwrap_or(1),
        })
    }

    #[instrument(skip(self), name = "futures::set_leverage")]
    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), BotError> {
        let params = format!("symbol={symbol}&leverage={leverage}");
        self.send_signed(reqwest::Method::POST, "/fapi/v1/leverage", &params)
            .await?;
        Ok(())
    }

    #[instrument(skip(self), name = "futures::place_market_order")]
    async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
    ) -> Result<ExchangeOrder, BotError> {
        let params = format!("symbol={symbol}&side={side}&type=MARKET&quantity={quantity}");
        let body = self.send_signed(reqwest::Method::POST, "/fapi/v1/order", &params).await?;
        Self::order_from_json(&body)
    }

    #[instrument(skip(self), name = "futures::place_stop_market_order")]
    async fn place_stop_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        stop_price: f64,
        quantity: f64,
        reduce_only: bool,
    ) -> Result<ExchangeOrder, BotError> {
        let params = format!(
            "symbol={symbol}&side={side}&type=STOP_MARKET&stopPrice={stop_price}&quantity={quantity}&reduceOnly={reduce_only}"
        );
        let body = self.send_signed(reqwest::Method::POST, "/fapi/v1/order", &params).await?;
        Self::order_from_json(&body)
    }

    #[instrument(skip(self), name = "futures::cancel_order")]
    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), BotError> {
        let params = format!("symbol={symbol}&orderId={order_id}");
        self.send_signed(reqwest::Method::DELETE, "/fapi/v1/order", &params)
            .await?;
        Ok(())
    }

    #[instrument(skip(self), name = "futures::get_order_status")]
    async fn get_order_status(&self, symbol: &str, order_id: &str) -> Result<ExchangeOrder, BotError> {
        let params = format!("symbol={symbol}&orderId={order_id}");
        let body = self.send_signed(reqwest::Method::GET, "/fapi/v1/order", &params).await?;
        Self::order_from_json(&body)
    }
}

impl std::fmt::Debug for BinanceFuturesClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinanceFuturesClient")
            .field("api_key", &"<redacted>")
            .field("secret", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_credentials() {
        let client = BinanceFuturesClient::new("my-api-key", "my-secret");
        let debug = format!("{client:?}");
        assert!(!debug.contains("my-api-key"));
        assert!(!debug.contains("my-secret"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn order_from_json_parses_fields() {
        let body = serde_json::json!({
            "orderId": 12345,
            "status": "FILLED",
            "side": "BUY",
            "origQty": "0.50",
            "executedQty": "0.50",
            "avgPrice": "100.25",
            "reduceOnly": false,
        });
        let order = BinanceFuturesClient::order_from_json(&body).unwrap();
        assert_eq!(order.order_id, "12345");
        assert_eq!(order.status, "FILLED");
        assert_eq!(order.side, OrderSide::Buy);
        assert_eq!(order.executed_qty, 0.50);
    }
}
