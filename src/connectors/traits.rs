// src/connectors/traits.rs
use crate::types::Candle;
use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;

/// A confirmed fill as folded back into engine state.
#[derive(Debug, Clone)]
pub struct OrderFill {
    pub symbol: String,
    /// Average execution price, not the quoted price.
    pub avg_price: f64,
    pub executed_qty: Decimal,
}

/// Narrow view of the exchange the engine runs against. Implementations own
/// no engine state; errors that matter to the decision logic are reported as
/// `EngineError` values inside the `anyhow` chain.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Recent closed candles for the pair, oldest first.
    async fn fetch_candles(&self, symbol: &str, interval: &str, limit: usize)
        -> Result<Vec<Candle>>;

    async fn fetch_last_price(&self, symbol: &str) -> Result<f64>;

    /// Rolling 24h traded volume in quote units.
    async fn fetch_quote_volume_24h(&self, symbol: &str) -> Result<f64>;

    /// Free (not locked) balance of a single asset.
    async fn fetch_free_balance(&self, asset: &str) -> Result<Decimal>;

    /// Whether the pair currently accepts orders.
    async fn market_active(&self, symbol: &str) -> Result<bool>;

    /// Quantity granularity the exchange enforces for the pair.
    async fn quantity_step(&self, symbol: &str) -> Result<Decimal>;

    async fn market_buy(&self, symbol: &str, quantity: Decimal) -> Result<OrderFill>;

    async fn market_sell(&self, symbol: &str, quantity: Decimal) -> Result<OrderFill>;
}

/// Splits a configured pair like "SOL/USDT" into (base, quote).
pub fn split_pair(pair: &str) -> Option<(&str, &str)> {
    let (base, quote) = pair.split_once('/')?;
    if base.is_empty() || quote.is_empty() {
        return None;
    }
    Some((base, quote))
}

/// Exchange symbol for a configured pair: "SOL/USDT" -> "SOLUSDT".
pub fn exchange_symbol(pair: &str) -> String {
    pair.replace('/', "")
}
