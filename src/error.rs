// src/error.rs
use thiserror::Error;

/// Classified failure modes surfaced by the exchange boundary and the stores.
/// Connector methods return `anyhow::Result` like the rest of the app; callers
/// that care about the class downcast with `err.downcast_ref::<EngineError>()`.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Network, rate-limit or exchange maintenance. Nothing is mutated, the
    /// pair is retried on the next tick.
    #[error("exchange error: {0}")]
    Exchange(String),

    #[error("call timed out after {0}s")]
    Timeout(u64),

    /// Exit order rejected because the asset is not actually held. Retrying
    /// can never succeed, so the position is closed for bookkeeping.
    #[error("insufficient balance: {0}")]
    InsufficientBalance(String),

    /// Pair suspended or delisted on the exchange side.
    #[error("market unavailable: {0}")]
    MarketUnavailable(String),

    #[error("storage error: {0}")]
    Storage(String),
}

/// Why a pair produced no snapshot this cycle without anything being wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Candle history shorter than the largest configured lookback.
    InsufficientHistory,
    /// An indicator window has not filled yet (NaN output).
    IndicatorWarmup,
}

/// Tagged result of one pair evaluation. Failure isolation is per pair: a
/// `Failed` outcome never aborts the tick, and tests can tell "no data" apart
/// from a transient failure.
#[derive(Debug)]
pub enum PairOutcome {
    Data(crate::types::PairSnapshot),
    Skipped(SkipReason),
    Failed(EngineError),
}
