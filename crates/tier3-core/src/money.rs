//! Monetary arithmetic helpers.
//!
//! Every amount that flows through the pipeline is a [`Decimal`]; floats are
//! never used for money. Rounding is half-up at cent resolution and happens
//! exactly once per line, at the total-discount summation, never per bucket.

use rust_decimal::{Decimal, RoundingStrategy};

/// Rounds a monetary value half-up to two decimal places.
#[must_use]
pub fn round_half_up(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Formats a savings amount for receipt display, e.g. `-$0.97`.
///
/// Savings are always shown as negative adjustments on the receipt.
#[must_use]
pub fn format_savings(value: Decimal) -> String {
    format!("-${:.2}", round_half_up(value))
}

/// Formats a plain dollar amount, e.g. `$7.00`.
#[must_use]
pub fn format_amount(value: Decimal) -> String {
    format!("${:.2}", round_half_up(value))
}
