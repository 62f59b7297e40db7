//! Decimal arithmetic utilities for financial calculations.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Round to tick size (e.g., 0.01 for most prices).
pub fn round_to_tick(value: Decimal, tick_size: Decimal) -> Decimal {
    if tick_size == Decimal::ZERO {
        return value;
    }
    (value / tick_size).round() * tick_size
}

/// Safe division that returns zero if divisor is zero or the quotient overflows.
pub fn safe_div(numerator: Decimal, denominator: Decimal) -> Decimal {
    numerator.checked_div(denominator).unwrap_or(Decimal::ZERO)
}

/// Whole shares `cash` buys at `price`, truncated toward zero.
///
/// Non-positive prices, negative cash and quotients too large to represent
/// give zero.
pub fn floor_shares(cash: Decimal, price: Decimal) -> i64 {
    if price <= Decimal::ZERO {
        return 0;
    }
    cash.checked_div(price)
        .and_then(|shares| shares.trunc().to_i64())
        .unwrap_or(0)
        .max(0)
}

/// Percentage change from `from` to `to`.
pub fn percentage_change(from: Decimal, to: Decimal) -> Decimal {
    safe_div(to - from, from) * dec!(100)
}
