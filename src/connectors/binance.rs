// src/connectors/binance.rs
use crate::connectors::messages::{
    Binance24hTicker, BinanceAccountInfo, BinanceApiError, BinanceExchangeInfo,
    BinanceOrderResponse,
};
use crate::connectors::traits::{ExchangeClient, OrderFill};
use crate::error::EngineError;
use crate::types::{Candle, Side};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use sha2::Sha256;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Mutex;
use tracing::info;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

const MAINNET_URL: &str = "https://api.binance.com";
const TESTNET_URL: &str = "https://testnet.binance.vision";
const RECV_WINDOW: &str = "60000";

pub struct BinanceClient {
    api_key: String,
    secret_key: String,
    http_client: Client,
    base_rest_url: String,
    /// LOT_SIZE steps are static per pair, fetched once.
    step_cache: Mutex<HashMap<String, Decimal>>,
}

impl BinanceClient {
    pub fn new(api_key: String, secret_key: String, sandbox: bool) -> Self {
        let base_rest_url = if sandbox { TESTNET_URL } else { MAINNET_URL };
        Self {
            api_key,
            secret_key,
            http_client: Client::new(),
            base_rest_url: base_rest_url.to_string(),
            step_cache: Mutex::new(HashMap::new()),
        }
    }

    fn sign_and_build_query(&self, params: Vec<(&str, String)>) -> Result<String> {
        let mut params = params;
        let timestamp = Utc::now().timestamp_millis().to_string();
        params.push(("recvWindow", RECV_WINDOW.to_string()));
        params.push(("timestamp", timestamp));

        let query_string = serde_urlencoded::to_string(&params)?;

        let mut mac = HmacSha256::new_from_slice(self.secret_key.as_bytes())
            .context("Invalid secret key length")?;
        mac.update(query_string.as_bytes());
        let result = mac.finalize();
        let signature = hex::encode(result.into_bytes());

        Ok(format!("{}&signature={}", query_string, signature))
    }

    async fn send_signed_request<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        params: Vec<(&str, String)>,
    ) -> Result<T> {
        let full_query = self.sign_and_build_query(params)?;
        let url = format!("{}{}?{}", self.base_rest_url, endpoint, full_query);

        let response = self
            .http_client
            .request(method, &url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(|e| EngineError::Exchange(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_api_error(status.as_u16(), &body).into());
        }

        Ok(response.json::<T>().await?)
    }

    async fn send_public_request<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> Result<T> {
        let query = serde_urlencoded::to_string(params)?;
        let url = format!("{}{}?{}", self.base_rest_url, endpoint, query);

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| EngineError::Exchange(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_api_error(status.as_u16(), &body).into());
        }

        Ok(response.json::<T>().await?)
    }

    async fn symbol_info(&self, symbol: &str) -> Result<crate::connectors::messages::BinanceSymbolInfo> {
        let info: BinanceExchangeInfo = self
            .send_public_request(
                "/api/v3/exchangeInfo",
                &[("symbol", symbol.to_string())],
            )
            .await?;
        info.symbols
            .into_iter()
            .find(|s| s.symbol == symbol)
            .ok_or_else(|| EngineError::MarketUnavailable(symbol.to_string()).into())
    }

    async fn place_market_order(
        &self,
        symbol: &str,
        side: Side,
        quantity: Decimal,
    ) -> Result<OrderFill> {
        let client_order_id = Uuid::new_v4().to_string();
        let params = vec![
            ("symbol", symbol.to_string()),
            ("side", side.as_str().to_string()),
            ("type", "MARKET".to_string()),
            ("quantity", quantity.to_string()),
            ("newClientOrderId", client_order_id),
        ];

        info!("🚀 Sending order: {} {} {}", side.as_str(), quantity, symbol);

        let resp: BinanceOrderResponse = self
            .send_signed_request(Method::POST, "/api/v3/order", params)
            .await?;

        let executed_qty = Decimal::from_str(&resp.executed_qty)?;
        let quote_qty = Decimal::from_str(&resp.cummulative_quote_qty)?;
        if executed_qty.is_zero() {
            return Err(anyhow!(
                "order {} for {} executed nothing (status {})",
                resp.order_id,
                symbol,
                resp.status
            ));
        }
        let avg_price = (quote_qty / executed_qty)
            .to_f64()
            .ok_or_else(|| anyhow!("unrepresentable fill price for {}", symbol))?;

        Ok(OrderFill {
            symbol: resp.symbol,
            avg_price,
            executed_qty,
        })
    }
}

/// Maps a Binance error payload to the engine taxonomy. -2010 rejections for
/// missing funds become InsufficientBalance so the exit path can stop
/// retrying; delisted/suspended symbols become MarketUnavailable.
fn classify_api_error(status: u16, body: &str) -> EngineError {
    if let Ok(api) = serde_json::from_str::<BinanceApiError>(body) {
        let lower = api.msg.to_lowercase();
        if api.code == -2010 && lower.contains("insufficient") {
            return EngineError::InsufficientBalance(api.msg);
        }
        if api.code == -1121 || lower.contains("market is closed") {
            return EngineError::MarketUnavailable(api.msg);
        }
        return EngineError::Exchange(format!("code {}: {}", api.code, api.msg));
    }
    EngineError::Exchange(format!("HTTP {status}: {body}"))
}

#[async_trait]
impl ExchangeClient for BinanceClient {
    async fn fetch_candles(
        &self,
        symbol: &str,
        interval: &str,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        // Klines come back as positional arrays:
        // [openTime, open, high, low, close, volume, closeTime, ...]
        let rows: Vec<Vec<serde_json::Value>> = self
            .send_public_request(
                "/api/v3/klines",
                &[
                    ("symbol", symbol.to_string()),
                    ("interval", interval.to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;

        let mut candles = Vec::with_capacity(rows.len());
        for row in rows {
            candles.push(parse_kline(symbol, &row)?);
        }
        Ok(candles)
    }

    async fn fetch_last_price(&self, symbol: &str) -> Result<f64> {
        let resp: serde_json::Value = self
            .send_public_request("/api/v3/ticker/price", &[("symbol", symbol.to_string())])
            .await?;
        resp.get("price")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<f64>().ok())
            .ok_or_else(|| anyhow!("Failed to parse price for {}", symbol))
    }

    async fn fetch_quote_volume_24h(&self, symbol: &str) -> Result<f64> {
        let ticker: Binance24hTicker = self
            .send_public_request("/api/v3/ticker/24hr", &[("symbol", symbol.to_string())])
            .await?;
        ticker
            .quote_volume
            .parse::<f64>()
            .with_context(|| format!("bad quoteVolume for {symbol}"))
    }

    async fn fetch_free_balance(&self, asset: &str) -> Result<Decimal> {
        let resp: BinanceAccountInfo = self
            .send_signed_request(Method::GET, "/api/v3/account", vec![])
            .await?;

        let balance = resp
            .balances
            .iter()
            .find(|b| b.asset == asset)
            .map(|b| Decimal::from_str(&b.free))
            .transpose()?
            .unwrap_or(Decimal::ZERO);

        Ok(balance)
    }

    async fn market_active(&self, symbol: &str) -> Result<bool> {
        let info = self.symbol_info(symbol).await?;
        Ok(info.status == "TRADING")
    }

    async fn quantity_step(&self, symbol: &str) -> Result<Decimal> {
        if let Some(step) = self
            .step_cache
            .lock()
            .map_err(|_| anyhow!("step cache mutex poisoned"))?
            .get(symbol)
        {
            return Ok(*step);
        }

        let info = self.symbol_info(symbol).await?;
        let step = info
            .filters
            .iter()
            .find(|f| f.filter_type == "LOT_SIZE")
            .and_then(|f| f.step_size.as_deref())
            .map(Decimal::from_str)
            .transpose()?
            .unwrap_or(Decimal::ZERO);

        self.step_cache
            .lock()
            .map_err(|_| anyhow!("step cache mutex poisoned"))?
            .insert(symbol.to_string(), step);
        Ok(step)
    }

    async fn market_buy(&self, symbol: &str, quantity: Decimal) -> Result<OrderFill> {
        self.place_market_order(symbol, Side::Buy, quantity).await
    }

    async fn market_sell(&self, symbol: &str, quantity: Decimal) -> Result<OrderFill> {
        self.place_market_order(symbol, Side::Sell, quantity).await
    }
}

fn parse_kline(symbol: &str, row: &[serde_json::Value]) -> Result<Candle> {
    if row.len() < 6 {
        return Err(anyhow!("short kline row for {}", symbol));
    }
    let num = |v: &serde_json::Value| -> Result<f64> {
        v.as_str()
            .and_then(|s| s.parse::<f64>().ok())
            .ok_or_else(|| anyhow!("bad kline field for {}", symbol))
    };
    Ok(Candle {
        open_time: row[0]
            .as_i64()
            .ok_or_else(|| anyhow!("bad kline open time for {}", symbol))?,
        open: num(&row[1])?,
        high: num(&row[2])?,
        low: num(&row[3])?,
        close: num(&row[4])?,
        volume: num(&row[5])?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kline_row_parses_into_a_candle() {
        let row: Vec<serde_json::Value> = serde_json::from_str(
            r#"[1700000000000, "141.20", "141.90", "140.80", "141.27", "5321.4", 1700000059999]"#,
        )
        .unwrap();
        let candle = parse_kline("SOLUSDT", &row).unwrap();
        assert_eq!(candle.open_time, 1_700_000_000_000);
        assert_eq!(candle.close, 141.27);
        assert_eq!(candle.volume, 5321.4);
    }

    #[test]
    fn insufficient_balance_rejection_is_classified() {
        let body = r#"{"code":-2010,"msg":"Account has insufficient balance for requested action."}"#;
        let err = classify_api_error(400, body);
        assert!(matches!(err, EngineError::InsufficientBalance(_)));
    }

    #[test]
    fn unknown_rejection_stays_transient() {
        let body = r#"{"code":-1003,"msg":"Too many requests."}"#;
        let err = classify_api_error(429, body);
        assert!(matches!(err, EngineError::Exchange(_)));
    }

    #[test]
    fn invalid_symbol_is_market_unavailable() {
        let body = r#"{"code":-1121,"msg":"Invalid symbol."}"#;
        let err = classify_api_error(400, body);
        assert!(matches!(err, EngineError::MarketUnavailable(_)));
    }
}
