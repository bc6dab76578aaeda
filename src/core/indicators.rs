// src/core/indicators.rs
use crate::config::StrategyConfig;
use crate::types::{Candle, IndicatorSnapshot};
use ta::indicators::{BollingerBands, ExponentialMovingAverage, SimpleMovingAverage};
use ta::Next;

const RSI_PERIOD: usize = 14;
const BAND_PERIOD: usize = 20;
const BAND_STD_DEV: f64 = 2.0;
const RSI_EPSILON: f64 = 1e-9;

/// Derives the per-cycle snapshot from a candle series, most-recent-last.
/// Returns `None` when the history is shorter than `min_len` or any value
/// comes out non-finite, in which case the pair is skipped for the cycle.
pub fn compute(
    candles: &[Candle],
    strategy: &StrategyConfig,
    min_len: usize,
) -> Option<IndicatorSnapshot> {
    if candles.len() < min_len.max(BAND_PERIOD + 1) {
        return None;
    }
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();

    let mut bands = BollingerBands::new(BAND_PERIOD, BAND_STD_DEV).ok()?;
    let mut band_out = None;
    for close in &closes {
        band_out = Some(bands.next(*close));
    }
    let band_out = band_out?;

    let mut ema = ExponentialMovingAverage::new(strategy.trend_period.max(1)).ok()?;
    let mut trend_ema = 0.0;
    for close in &closes {
        trend_ema = ema.next(*close);
    }

    let mut long_mas = Vec::with_capacity(strategy.macro_trend_periods.len());
    for period in &strategy.macro_trend_periods {
        let mut sma = SimpleMovingAverage::new(*period).ok()?;
        let mut value = 0.0;
        for close in &closes {
            value = sma.next(*close);
        }
        long_mas.push((*period, value));
    }

    let snapshot = IndicatorSnapshot {
        price: *closes.last()?,
        rsi: rolling_rsi(&closes, RSI_PERIOD)?,
        lower_band: band_out.lower,
        upper_band: band_out.upper,
        short_ma: band_out.average,
        long_mas,
        trend_ema,
    };

    if !snapshot.is_finite() {
        return None;
    }
    Some(snapshot)
}

/// RSI over a plain rolling mean of gains and losses (not Wilder smoothing,
/// which the `ta` crate implements). The epsilon keeps the ratio defined on a
/// window with no losing bars.
fn rolling_rsi(closes: &[f64], period: usize) -> Option<f64> {
    if closes.len() < period + 1 {
        return None;
    }
    let window = &closes[closes.len() - period - 1..];
    let mut gains = 0.0;
    let mut losses = 0.0;
    for pair in window.windows(2) {
        let delta = pair[1] - pair[0];
        if delta > 0.0 {
            gains += delta;
        } else {
            losses -= delta;
        }
    }
    let rs = (gains / period as f64) / (losses / period as f64 + RSI_EPSILON);
    Some(100.0 - 100.0 / (1.0 + rs))
}

impl IndicatorSnapshot {
    fn is_finite(&self) -> bool {
        self.price.is_finite()
            && self.rsi.is_finite()
            && self.lower_band.is_finite()
            && self.upper_band.is_finite()
            && self.short_ma.is_finite()
            && self.trend_ema.is_finite()
            && self.long_mas.iter().all(|(_, v)| v.is_finite())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candles(closes: &[f64]) -> Vec<Candle> {
        closes
            .iter()
            .enumerate()
            .map(|(i, c)| Candle {
                open_time: i as i64 * 60_000,
                open: *c,
                high: *c,
                low: *c,
                close: *c,
                volume: 1.0,
            })
            .collect()
    }

    fn strategy() -> StrategyConfig {
        StrategyConfig {
            rsi_oversold: 30.0,
            band_margin: 0.005,
            use_trend_filter: true,
            trend_period: 10,
            macro_trend_periods: vec![10],
            min_quote_volume_24h: 0.0,
        }
    }

    #[test]
    fn short_history_is_skipped() {
        let series = candles(&[100.0; 10]);
        assert!(compute(&series, &strategy(), 30).is_none());
    }

    #[test]
    fn flat_series_collapses_bands_onto_price() {
        let series = candles(&[50.0; 40]);
        let snap = compute(&series, &strategy(), 21).unwrap();
        assert!((snap.short_ma - 50.0).abs() < 1e-9);
        assert!((snap.lower_band - 50.0).abs() < 1e-9);
        assert!((snap.upper_band - 50.0).abs() < 1e-9);
        assert!((snap.trend_ema - 50.0).abs() < 1e-9);
        assert_eq!(snap.long_mas, vec![(10, 50.0)]);
    }

    #[test]
    fn rsi_saturates_on_pure_uptrend() {
        let closes: Vec<f64> = (0..40).map(|i| 100.0 + i as f64).collect();
        let snap = compute(&candles(&closes), &strategy(), 21).unwrap();
        assert!(snap.rsi > 99.9, "rsi = {}", snap.rsi);
    }

    #[test]
    fn rsi_is_zero_on_pure_downtrend() {
        let closes: Vec<f64> = (0..40).map(|i| 200.0 - i as f64).collect();
        let snap = compute(&candles(&closes), &strategy(), 21).unwrap();
        assert!(snap.rsi < 0.1, "rsi = {}", snap.rsi);
    }

    #[test]
    fn rolling_rsi_matches_hand_computation() {
        // 14 deltas: 7 of +2, 7 of -1 -> avg gain 1.0, avg loss 0.5 -> rs = 2
        let mut closes = vec![100.0];
        for i in 0..14 {
            let last = *closes.last().unwrap();
            closes.push(if i % 2 == 0 { last + 2.0 } else { last - 1.0 });
        }
        let rsi = rolling_rsi(&closes, 14).unwrap();
        let expected = 100.0 - 100.0 / (1.0 + 2.0);
        assert!((rsi - expected).abs() < 1e-6, "rsi = {rsi}");
    }

    #[test]
    fn band_width_tracks_dispersion() {
        let closes: Vec<f64> = (0..40)
            .map(|i| if i % 2 == 0 { 95.0 } else { 105.0 })
            .collect();
        let snap = compute(&candles(&closes), &strategy(), 21).unwrap();
        assert!(snap.upper_band > snap.short_ma);
        assert!(snap.lower_band < snap.short_ma);
        // MA(20) of an even mix of 95/105 is 100, std is 5, k = 2
        assert!((snap.short_ma - 100.0).abs() < 1e-9);
        assert!((snap.upper_band - 110.0).abs() < 1e-9);
        assert!((snap.lower_band - 90.0).abs() < 1e-9);
    }
}
