// src/utils/precision.rs
use rust_decimal::Decimal;

/// Rounds a quantity DOWN to the nearest multiple of step_size.
/// Example: amount=0.0109, step=0.001 -> 0.010
pub fn normalize_quantity(amount: Decimal, step_size: Decimal) -> Decimal {
    if step_size.is_zero() {
        return amount;
    }
    with_scale_of((amount / step_size).floor() * step_size, step_size)
}

/// Rounds a price to the NEAREST multiple of tick_size.
/// Example: price=100.16, tick=0.1 -> 100.2
pub fn normalize_price(price: Decimal, tick_size: Decimal) -> Decimal {
    if tick_size.is_zero() {
        return price;
    }
    with_scale_of((price / tick_size).round() * tick_size, tick_size)
}

// keep the step's scale so "0.010" prints as the exchange expects
fn with_scale_of(value: Decimal, step: Decimal) -> Decimal {
    let mut out = value.normalize();
    if out.scale() < step.scale() {
        out.rescale(step.scale());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn quantity_rounds_down_to_step() {
        assert_eq!(normalize_quantity(dec!(0.0109), dec!(0.001)), dec!(0.010));
        assert_eq!(normalize_quantity(dec!(10.999), dec!(1)), dec!(10));
        assert_eq!(normalize_quantity(dec!(0.0109), dec!(0.001)).to_string(), "0.010");
    }

    #[test]
    fn price_rounds_to_nearest_tick() {
        assert_eq!(normalize_price(dec!(100.16), dec!(0.1)), dec!(100.2));
        assert_eq!(normalize_price(dec!(50000.04), dec!(0.5)), dec!(50000.0));
    }

    #[test]
    fn zero_step_is_passthrough() {
        assert_eq!(normalize_quantity(dec!(1.23456), Decimal::ZERO), dec!(1.23456));
        assert_eq!(normalize_price(dec!(1.23456), Decimal::ZERO), dec!(1.23456));
    }
}
