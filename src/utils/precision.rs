// src/utils/precision.rs
use rust_decimal::Decimal;

/// Rounds a quantity DOWN to the nearest multiple of step_size.
/// Example: amount=10.999, step=1.0 -> 10.0
pub fn normalize_quantity(amount: Decimal, step_size: Decimal) -> Decimal {
    if step_size.is_zero() {
        return amount;
    }
    (amount / step_size).floor() * step_size
}

/// One step below the normalized quantity, floored at zero. Used when a sell
/// still exceeds the actually held balance after rounding drift.
pub fn step_down(quantity: Decimal, step_size: Decimal) -> Decimal {
    let reduced = quantity - step_size;
    if reduced.is_sign_negative() {
        Decimal::ZERO
    } else {
        reduced
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::prelude::FromPrimitive;

    fn dec(v: f64) -> Decimal {
        Decimal::from_f64(v).unwrap()
    }

    #[test]
    fn quantity_rounds_down_to_step() {
        assert_eq!(normalize_quantity(dec(10.999), dec(1.0)), dec(10.0));
        assert_eq!(normalize_quantity(dec(0.123456), dec(0.001)), dec(0.123));
    }

    #[test]
    fn zero_step_passes_through() {
        assert_eq!(normalize_quantity(dec(10.999), Decimal::ZERO), dec(10.999));
    }

    #[test]
    fn step_down_floors_at_zero() {
        assert_eq!(step_down(dec(0.123), dec(0.001)), dec(0.122));
        assert_eq!(step_down(dec(0.0005), dec(0.001)), Decimal::ZERO);
    }
}
