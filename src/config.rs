// src/config.rs

use config::{Config, ConfigError, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct StrategyConfig {
    #[serde(default = "default_rsi_oversold")]
    pub rsi_oversold: f64,
    /// Tolerance above the lower band that still counts as "at the band".
    #[serde(default = "default_band_margin")]
    pub band_margin: f64,
    #[serde(default = "default_true")]
    pub use_trend_filter: bool,
    /// EMA span of the long-term trend filter.
    #[serde(default = "default_trend_period")]
    pub trend_period: usize,
    /// Price must sit above every one of these SMAs for a macro uptrend.
    #[serde(default = "default_macro_trend_periods")]
    pub macro_trend_periods: Vec<usize>,
    /// Liquidity floor in quote units; 0 disables the check.
    #[serde(default = "default_min_quote_volume")]
    pub min_quote_volume_24h: f64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RiskConfig {
    /// Quote units committed per entry.
    #[serde(default = "default_trade_amount")]
    pub trade_amount: f64,
    #[serde(default = "default_max_open_trades")]
    pub max_open_trades: usize,
    #[serde(default = "default_take_profit")]
    pub take_profit_pct: f64,
    #[serde(default = "default_stop_loss")]
    pub stop_loss_pct: f64,
    #[serde(default = "default_true")]
    pub use_trailing_stop: bool,
    #[serde(default = "default_trailing_activation")]
    pub trailing_activation: f64,
    #[serde(default = "default_trailing_callback")]
    pub trailing_callback: f64,
    #[serde(default = "default_true")]
    pub use_break_even: bool,
    #[serde(default = "default_break_even_trigger")]
    pub break_even_trigger: f64,
    /// Margin above entry that a secured stop keeps to cover fees.
    #[serde(default = "default_fee_buffer")]
    pub fee_buffer: f64,
    /// Max holding time for a position that never armed its trailing stop.
    #[serde(default = "default_zombie_timeout")]
    pub zombie_timeout_secs: i64,
    #[serde(default = "default_standard_cooldown")]
    pub standard_cooldown_secs: i64,
    /// Applied after a timeout liquidation instead of the standard one.
    #[serde(default = "default_extended_cooldown")]
    pub extended_cooldown_secs: i64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    #[serde(default = "default_candle_lookback")]
    pub candle_lookback: usize,
    #[serde(default = "default_candle_interval")]
    pub candle_interval: String,
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,
    /// Per-call timeout for exchange I/O; a hung call skips the pair, not the tick.
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,
    #[serde(default = "default_state_file")]
    pub state_file: String,
    #[serde(default = "default_ledger_file")]
    pub ledger_file: String,
    /// How many recent sells to surface in the history panel.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub pairs: Vec<String>,
    #[serde(default)]
    pub sandbox_mode: bool,
    #[serde(default)]
    pub headless: bool,
    pub strategy: StrategyConfig,
    pub risk: RiskConfig,
    pub engine: EngineConfig,
}

impl AppConfig {
    pub fn new() -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(File::with_name("Settings"))
            .add_source(config::Environment::with_prefix("APP").separator("__"));

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Shortest candle history that lets every indicator produce a value.
    pub fn min_history(&self) -> usize {
        let mut need = 21; // MA(20) needs 20, RSI(14) needs 15 closes
        if self.strategy.use_trend_filter {
            need = need.max(self.strategy.trend_period);
            for p in &self.strategy.macro_trend_periods {
                need = need.max(*p);
            }
        }
        need
    }
}

fn default_rsi_oversold() -> f64 {
    30.0
}
fn default_band_margin() -> f64 {
    0.005
}
fn default_trend_period() -> usize {
    200
}
fn default_macro_trend_periods() -> Vec<usize> {
    vec![200, 500]
}
fn default_min_quote_volume() -> f64 {
    1_000_000.0
}
fn default_trade_amount() -> f64 {
    11.0
}
fn default_max_open_trades() -> usize {
    2
}
fn default_take_profit() -> f64 {
    0.021
}
fn default_stop_loss() -> f64 {
    0.025
}
fn default_trailing_activation() -> f64 {
    0.021
}
fn default_trailing_callback() -> f64 {
    0.003
}
fn default_break_even_trigger() -> f64 {
    0.008
}
fn default_fee_buffer() -> f64 {
    0.001
}
fn default_zombie_timeout() -> i64 {
    7200
}
fn default_standard_cooldown() -> i64 {
    300
}
fn default_extended_cooldown() -> i64 {
    900
}
fn default_candle_lookback() -> usize {
    600
}
fn default_candle_interval() -> String {
    "1m".to_string()
}
fn default_tick_interval() -> u64 {
    1
}
fn default_call_timeout() -> u64 {
    10
}
fn default_state_file() -> String {
    "positions.json".to_string()
}
fn default_ledger_file() -> String {
    "trades_history.db".to_string()
}
fn default_history_limit() -> usize {
    10
}
fn default_true() -> bool {
    true
}
