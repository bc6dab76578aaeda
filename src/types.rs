// src/types.rs
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

/// One OHLCV bar. Sequences are ordered most-recent-last.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Derived values for the most recent candle of one pair. Recomputed every
/// cycle, never persisted.
#[derive(Debug, Clone)]
pub struct IndicatorSnapshot {
    pub price: f64,
    pub rsi: f64,
    pub lower_band: f64,
    pub upper_band: f64,
    pub short_ma: f64,
    /// (period, value) for each configured macro SMA.
    pub long_mas: Vec<(usize, f64)>,
    pub trend_ema: f64,
}

/// PendingEntry reserves a slot for the duration of the buy call; Open and
/// PendingExit are the held states. PendingEntry and Open both count against
/// the slot limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleState {
    PendingEntry,
    Open,
    PendingExit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub entry_price: f64,
    pub quantity: Decimal,
    pub opened_at: i64,
    /// 0.0 = trailing stop not armed; non-decreasing once armed.
    pub high_watermark: f64,
    /// Break-even shield armed.
    pub secured: bool,
    pub state: LifecycleState,
}

impl Position {
    pub fn pending(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            entry_price: 0.0,
            quantity: Decimal::ZERO,
            opened_at: 0,
            high_watermark: 0.0,
            secured: false,
            state: LifecycleState::PendingEntry,
        }
    }

    /// Unrealized profit as a fraction of entry (0.021 = 2.1%).
    pub fn profit_pct(&self, price: f64) -> f64 {
        if self.entry_price == 0.0 {
            return 0.0;
        }
        (price - self.entry_price) / self.entry_price
    }

    pub fn holds_slot(&self) -> bool {
        matches!(
            self.state,
            LifecycleState::PendingEntry | LifecycleState::Open
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    StopLoss,
    BreakEven,
    TrailingProfit,
    TakeProfit,
    Timeout,
}

impl ExitReason {
    /// Timeout exits sit out the extended cooldown, everything else the
    /// standard one.
    pub fn extended_cooldown(&self) -> bool {
        matches!(self, ExitReason::Timeout)
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExitReason::StopLoss => "STOP LOSS",
            ExitReason::BreakEven => "BREAK-EVEN",
            ExitReason::TrailingProfit => "TRAILING PROFIT",
            ExitReason::TakeProfit => "TAKE PROFIT",
            ExitReason::Timeout => "TIMEOUT",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Portfolio {
    pub available_capital: f64,
    pub floating_pnl: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairStatus {
    Idle,
    /// Slot limit reached, only exits are being managed.
    Saturated,
    Cooldown { remaining_secs: i64 },
    Holding,
    Entering,
}

impl fmt::Display for PairStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PairStatus::Idle => f.write_str("NEUTRAL"),
            PairStatus::Saturated => f.write_str("NEUTRAL (full)"),
            PairStatus::Cooldown { remaining_secs } => write!(f, "WAIT ({remaining_secs}s)"),
            PairStatus::Holding => f.write_str("HOLDING"),
            PairStatus::Entering => f.write_str("BUY!"),
        }
    }
}

/// Per-pair row emitted to the UI every cycle.
#[derive(Debug, Clone)]
pub struct PairSnapshot {
    pub symbol: String,
    pub price: f64,
    pub rsi: f64,
    pub status: PairStatus,
    pub position: Option<Position>,
}

/// One closed trade as stored in the ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerRecord {
    pub id: i64,
    pub symbol: String,
    pub side: Side,
    pub price: f64,
    pub quantity: f64,
    pub pnl: f64,
    pub timestamp: String,
}

/// Messages from the engine to any consumer (TUI, headless logger).
/// Portfolio and PairsData are latest-wins; consumers must tolerate drops.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Log(String),
    Portfolio(Portfolio),
    PairsData(Vec<PairSnapshot>),
    TradeHistory(Vec<LedgerRecord>),
}

/// Control surface exposed to the driving collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineCommand {
    Start,
    Stop,
    Panic,
}
