// src/core/signal.rs
use crate::config::StrategyConfig;
use crate::types::IndicatorSnapshot;

/// Entry gate for one pair. Slot, cooldown and running-mode preconditions are
/// checked by the orchestrator; this only judges the indicator picture:
/// macro trend up (when enabled), RSI oversold, price at the lower band.
pub fn entry_signal(snap: &IndicatorSnapshot, strategy: &StrategyConfig) -> bool {
    if strategy.use_trend_filter {
        if snap.price <= snap.trend_ema {
            return false;
        }
        if snap.long_mas.iter().any(|(_, ma)| snap.price <= *ma) {
            return false;
        }
    }

    if snap.rsi >= strategy.rsi_oversold {
        return false;
    }

    snap.price <= snap.lower_band * (1.0 + strategy.band_margin)
}
