// src/connectors/messages.rs
use serde::Deserialize;

/// Error payload Binance returns with non-2xx order/account responses.
#[derive(Debug, Deserialize)]
pub struct BinanceApiError {
    pub code: i64,
    pub msg: String,
}

/// Response to POST /api/v3/order with type=MARKET. The average fill price
/// is not a field; it is `cummulativeQuoteQty / executedQty`.
#[derive(Debug, Deserialize)]
pub struct BinanceOrderResponse {
    #[serde(rename = "orderId")]
    pub order_id: u64,

    pub symbol: String,

    pub status: String,

    #[serde(rename = "executedQty")]
    pub executed_qty: String,

    #[serde(rename = "cummulativeQuoteQty")]
    pub cummulative_quote_qty: String,
}

/// Subset of GET /api/v3/ticker/24hr.
#[derive(Debug, Deserialize)]
pub struct Binance24hTicker {
    #[serde(rename = "quoteVolume")]
    pub quote_volume: String,
}

#[derive(Debug, Deserialize)]
pub struct BinanceBalance {
    pub asset: String,
    pub free: String,
}

#[derive(Debug, Deserialize)]
pub struct BinanceAccountInfo {
    pub balances: Vec<BinanceBalance>,
}

/// Subset of GET /api/v3/exchangeInfo for one symbol.
#[derive(Debug, Deserialize)]
pub struct BinanceExchangeInfo {
    pub symbols: Vec<BinanceSymbolInfo>,
}

#[derive(Debug, Deserialize)]
pub struct BinanceSymbolInfo {
    pub symbol: String,

    /// "TRADING" when the pair accepts orders.
    pub status: String,

    pub filters: Vec<BinanceSymbolFilter>,
}

#[derive(Debug, Deserialize)]
pub struct BinanceSymbolFilter {
    #[serde(rename = "filterType")]
    pub filter_type: String,

    #[serde(rename = "stepSize")]
    pub step_size: Option<String>,
}
