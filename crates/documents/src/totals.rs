//! Totals Calculator.
//!
//! Sums are carried in full precision; each aggregate is rounded exactly once
//! to 2 decimal places, half away from zero.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use tally_core::ValueObject;

pub const MONEY_DECIMAL_PLACES: u32 = 2;

/// Anything that carries `quantity`, `unit_price` and a percentage `tax_rate`.
pub trait Priced {
    fn quantity(&self) -> Decimal;
    fn unit_price(&self) -> Decimal;
    fn tax_rate(&self) -> Decimal;
}

impl<T: Priced + ?Sized> Priced for &T {
    fn quantity(&self) -> Decimal {
        (**self).quantity()
    }

    fn unit_price(&self) -> Decimal {
        (**self).unit_price()
    }

    fn tax_rate(&self) -> Decimal {
        (**self).tax_rate()
    }
}

/// Document totals. Persisted redundantly on the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Totals {
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
}

impl ValueObject for Totals {}

impl Totals {
    pub fn zero() -> Self {
        Self::default()
    }
}

pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(MONEY_DECIMAL_PLACES, RoundingStrategy::MidpointAwayFromZero)
}

/// Compute subtotal/tax/total over an ordered set of lines. Never fails.
pub fn calculate_totals<I>(lines: I) -> Totals
where
    I: IntoIterator,
    I::Item: Priced,
{
    let mut subtotal = Decimal::ZERO;
    let mut tax = Decimal::ZERO;

    for line in lines {
        let line_subtotal = line.quantity() * line.unit_price();
        subtotal += line_subtotal;
        tax += line_subtotal * line.tax_rate() / Decimal::ONE_HUNDRED;
    }

    Totals {
        subtotal: round_money(subtotal),
        tax: round_money(tax),
        total: round_money(subtotal + tax),
    }
}
