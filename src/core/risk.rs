// src/core/risk.rs
use crate::config::RiskConfig;
use crate::types::{ExitReason, Position};

/// What the protection rules want done to an open position this cycle.
/// At most one exit reason is ever set; `secure` and `arm_watermark` are
/// state transitions the engine must persist even when no exit fires.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RiskDecision {
    /// Arm the break-even shield.
    pub secure: bool,
    /// Arm the trailing stop, or raise an already armed watermark.
    pub arm_watermark: Option<f64>,
    pub exit: Option<ExitReason>,
}

impl RiskDecision {
    fn hold() -> Self {
        Self::default()
    }
}

/// Exit rules in strict priority order. The first exit that fires wins the
/// cycle; arming rules do not exit and evaluation continues past them.
pub fn evaluate(position: &Position, price: f64, now: i64, risk: &RiskConfig) -> RiskDecision {
    let mut decision = RiskDecision::hold();
    let profit = position.profit_pct(price);

    // 1. Break-even arm.
    let mut secured = position.secured;
    if risk.use_break_even && !secured && profit >= risk.break_even_trigger {
        decision.secure = true;
        secured = true;
    }

    // 2. Stop check against the effective stop price.
    let stop = if secured {
        position.entry_price * (1.0 + risk.fee_buffer)
    } else {
        position.entry_price * (1.0 - risk.stop_loss_pct)
    };
    if price <= stop {
        decision.exit = Some(if secured {
            ExitReason::BreakEven
        } else {
            ExitReason::StopLoss
        });
        return decision;
    }

    // 3. Trailing stop: arm once, then ratchet the watermark and watch the
    // pullback from it.
    if risk.use_trailing_stop {
        if position.high_watermark == 0.0 {
            if profit >= risk.trailing_activation {
                decision.arm_watermark = Some(price);
                return decision;
            }
        } else {
            let watermark = position.high_watermark.max(price);
            if watermark > position.high_watermark {
                decision.arm_watermark = Some(watermark);
            }
            let pullback = (watermark - price) / watermark;
            if pullback >= risk.trailing_callback {
                decision.exit = Some(ExitReason::TrailingProfit);
            }
            return decision;
        }
    } else if profit >= risk.take_profit_pct {
        // 4. Fixed take-profit, only while the trailing stop is disabled.
        decision.exit = Some(ExitReason::TakeProfit);
        return decision;
    }

    // 5. Timeout liquidation, only for positions that never armed trailing.
    if position.high_watermark == 0.0 && now - position.opened_at >= risk.zombie_timeout_secs {
        decision.exit = Some(ExitReason::Timeout);
    }

    decision
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LifecycleState;
    use rust_decimal::Decimal;

    fn risk() -> RiskConfig {
        RiskConfig {
            trade_amount: 11.0,
            max_open_trades: 2,
            take_profit_pct: 0.021,
            stop_loss_pct: 0.025,
            use_trailing_stop: true,
            trailing_activation: 0.021,
            trailing_callback: 0.03,
            use_break_even: true,
            break_even_trigger: 0.008,
            fee_buffer: 0.0002,
            zombie_timeout_secs: 7200,
            standard_cooldown_secs: 300,
            extended_cooldown_secs: 900,
        }
    }

    fn open_position(entry: f64) -> Position {
        Position {
            symbol: "SOLUSDT".to_string(),
            entry_price: entry,
            quantity: Decimal::ONE,
            opened_at: 1_700_000_000,
            high_watermark: 0.0,
            secured: false,
            state: LifecycleState::Open,
        }
    }

    #[test]
    fn holds_inside_the_neutral_zone() {
        let pos = open_position(100.0);
        let d = evaluate(&pos, 100.5, pos.opened_at + 60, &risk());
        assert_eq!(d, RiskDecision::default());
    }

    #[test]
    fn stop_loss_fires_below_threshold() {
        let pos = open_position(100.0);
        let d = evaluate(&pos, 97.4, pos.opened_at + 60, &risk());
        assert_eq!(d.exit, Some(ExitReason::StopLoss));
        assert!(!d.secure);
    }

    #[test]
    fn break_even_arms_without_exiting() {
        let pos = open_position(100.0);
        let d = evaluate(&pos, 101.0, pos.opened_at + 60, &risk());
        assert!(d.secure);
        assert_eq!(d.exit, None);
    }

    #[test]
    fn secured_stop_uses_fee_buffer() {
        // entry 100, fee buffer 0.02% -> stop 100.02
        let mut pos = open_position(100.0);
        pos.secured = true;

        let d = evaluate(&pos, 100.05, pos.opened_at + 60, &risk());
        assert_eq!(d.exit, None, "just above the buffered stop must hold");

        let d = evaluate(&pos, 99.9, pos.opened_at + 60, &risk());
        assert_eq!(d.exit, Some(ExitReason::BreakEven));
    }

    #[test]
    fn trailing_arms_at_activation_profit() {
        let mut pos = open_position(100.0);
        pos.secured = true;
        let d = evaluate(&pos, 102.5, pos.opened_at + 60, &risk());
        assert_eq!(d.arm_watermark, Some(102.5));
        assert_eq!(d.exit, None);
    }

    #[test]
    fn watermark_only_ratchets_upward() {
        let mut pos = open_position(100.0);
        pos.secured = true;
        pos.high_watermark = 110.0;

        let d = evaluate(&pos, 112.0, pos.opened_at + 60, &risk());
        assert_eq!(d.arm_watermark, Some(112.0));

        let d = evaluate(&pos, 109.0, pos.opened_at + 60, &risk());
        assert_eq!(d.arm_watermark, None, "a lower price must not move it");
    }

    #[test]
    fn trailing_exit_on_pullback_from_peak() {
        // entry 100, watermark 110, callback 3%; 106.6 is a 3.09% pullback
        let mut pos = open_position(100.0);
        pos.secured = true;
        pos.high_watermark = 110.0;
        let d = evaluate(&pos, 106.6, pos.opened_at + 60, &risk());
        assert_eq!(d.exit, Some(ExitReason::TrailingProfit));
    }

    #[test]
    fn shallow_pullback_holds() {
        let mut pos = open_position(100.0);
        pos.secured = true;
        pos.high_watermark = 110.0;
        let d = evaluate(&pos, 107.5, pos.opened_at + 60, &risk());
        assert_eq!(d.exit, None);
    }

    #[test]
    fn fixed_take_profit_only_when_trailing_disabled() {
        let mut cfg = risk();
        let mut pos = open_position(100.0);
        pos.secured = true;

        let d = evaluate(&pos, 102.5, pos.opened_at + 60, &cfg);
        assert_ne!(d.exit, Some(ExitReason::TakeProfit));

        cfg.use_trailing_stop = false;
        let d = evaluate(&pos, 102.5, pos.opened_at + 60, &cfg);
        assert_eq!(d.exit, Some(ExitReason::TakeProfit));
    }

    #[test]
    fn timeout_fires_for_never_profitable_position() {
        let cfg = risk();
        let pos = open_position(100.0);
        let now = pos.opened_at + cfg.zombie_timeout_secs + 1;
        let d = evaluate(&pos, 100.2, now, &cfg);
        assert_eq!(d.exit, Some(ExitReason::Timeout));
        assert!(d.exit.unwrap().extended_cooldown());
    }

    #[test]
    fn timeout_never_fires_once_trailing_armed() {
        let cfg = risk();
        let mut pos = open_position(100.0);
        pos.secured = true;
        pos.high_watermark = 110.0;
        let now = pos.opened_at + cfg.zombie_timeout_secs + 1;
        let d = evaluate(&pos, 109.9, now, &cfg);
        assert_eq!(d.exit, None);
    }

    #[test]
    fn arming_and_timeout_can_share_a_cycle() {
        // 1% profit arms the shield but never armed trailing; held too long.
        let cfg = risk();
        let pos = open_position(100.0);
        let now = pos.opened_at + cfg.zombie_timeout_secs;
        let d = evaluate(&pos, 101.0, now, &cfg);
        assert!(d.secure);
        assert_eq!(d.exit, Some(ExitReason::Timeout));
    }

    #[test]
    fn exactly_one_exit_reason_per_cycle() {
        // Deep in loss and far past the timeout: the stop wins on priority.
        let cfg = risk();
        let pos = open_position(100.0);
        let now = pos.opened_at + cfg.zombie_timeout_secs * 2;
        let d = evaluate(&pos, 90.0, now, &cfg);
        assert_eq!(d.exit, Some(ExitReason::StopLoss));
    }
}
