use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use tally_core::{DocumentId, DomainError, DomainResult, Entity, LineItemId, ValueObject};

use crate::totals::{Priced, round_money};

/// Line input as supplied by a caller, before it is attached to a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItemInput {
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    /// Percentage in `[0, 100]`.
    pub tax_rate: Decimal,
}

impl ValueObject for LineItemInput {}

/// Decimal places stored for `quantity` and `unit_price`.
pub const AMOUNT_MAX_SCALE: u32 = 4;
/// Decimal places stored for `tax_rate`.
pub const TAX_RATE_MAX_SCALE: u32 = 2;
/// Integer digits stored for `quantity` and `unit_price`.
pub const AMOUNT_MAX_INTEGER_DIGITS: u32 = 10;

fn check_amount(field: &str, value: Decimal) -> DomainResult<()> {
    let limit = Decimal::from(10_i64.pow(AMOUNT_MAX_INTEGER_DIGITS));
    if value.abs() >= limit {
        return Err(DomainError::validation(format!(
            "line {field} must have at most {AMOUNT_MAX_INTEGER_DIGITS} integer digits"
        )));
    }
    if value.normalize().scale() > AMOUNT_MAX_SCALE {
        return Err(DomainError::validation(format!(
            "line {field} must have at most {AMOUNT_MAX_SCALE} decimal places"
        )));
    }
    Ok(())
}

impl LineItemInput {
    pub fn new(
        description: impl Into<String>,
        quantity: Decimal,
        unit_price: Decimal,
        tax_rate: Decimal,
    ) -> Self {
        Self {
            description: description.into(),
            quantity,
            unit_price,
            tax_rate,
        }
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.description.trim().is_empty() {
            return Err(DomainError::validation("line description must not be empty"));
        }
        if self.quantity <= Decimal::ZERO {
            return Err(DomainError::validation("line quantity must be positive"));
        }
        if self.unit_price < Decimal::ZERO {
            return Err(DomainError::validation("line unit_price must not be negative"));
        }
        check_amount("quantity", self.quantity)?;
        check_amount("unit_price", self.unit_price)?;
        if self.tax_rate < Decimal::ZERO || self.tax_rate > Decimal::ONE_HUNDRED {
            return Err(DomainError::validation("line tax_rate must be within 0..=100"));
        }
        if self.tax_rate.normalize().scale() > TAX_RATE_MAX_SCALE {
            return Err(DomainError::validation(format!(
                "line tax_rate must have at most {TAX_RATE_MAX_SCALE} decimal places"
            )));
        }
        Ok(())
    }
}

impl Priced for LineItemInput {
    fn quantity(&self) -> Decimal {
        self.quantity
    }

    fn unit_price(&self) -> Decimal {
        self.unit_price
    }

    fn tax_rate(&self) -> Decimal {
        self.tax_rate
    }
}

/// Gross total of a single invoice line, rounded per line.
///
/// This is NOT how document totals are computed: the Totals Calculator sums in
/// full precision and rounds once per aggregate. Invoice items persist this
/// per-line figure, so the two can disagree by a cent on multi-line invoices.
pub fn invoice_line_total(line: &impl Priced) -> Decimal {
    let factor = Decimal::ONE + line.tax_rate() / Decimal::ONE_HUNDRED;
    round_money(line.quantity() * line.unit_price() * factor)
}

/// A persisted line, owned by exactly one document header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub id: LineItemId,
    pub document_id: DocumentId,
    pub position: u32,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub tax_rate: Decimal,
    /// Per-line gross total; only persisted for invoice items.
    pub line_total: Option<Decimal>,
}

impl LineItem {
    /// Attach a validated input to a header at `position` (1-based).
    pub fn from_input(
        document_id: DocumentId,
        position: u32,
        input: &LineItemInput,
        with_line_total: bool,
    ) -> Self {
        Self {
            id: LineItemId::new(),
            document_id,
            position,
            description: input.description.clone(),
            quantity: input.quantity,
            unit_price: input.unit_price,
            tax_rate: input.tax_rate,
            line_total: with_line_total.then(|| invoice_line_total(input)),
        }
    }

    pub fn to_input(&self) -> LineItemInput {
        LineItemInput {
            description: self.description.clone(),
            quantity: self.quantity,
            unit_price: self.unit_price,
            tax_rate: self.tax_rate,
        }
    }
}

impl Entity for LineItem {
    type Id = LineItemId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl Priced for LineItem {
    fn quantity(&self) -> Decimal {
        self.quantity
    }

    fn unit_price(&self) -> Decimal {
        self.unit_price
    }

    fn tax_rate(&self) -> Decimal {
        self.tax_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn line(qty: Decimal, price: Decimal, rate: Decimal) -> LineItemInput {
        LineItemInput::new("Consulting", qty, price, rate)
    }

    #[test]
    fn rejects_blank_description() {
        let input = LineItemInput::new("   ", dec!(1), dec!(10), dec!(0));
        assert!(matches!(input.validate(), Err(DomainError::Validation(_))));
    }

    #[test]
    fn rejects_non_positive_quantity() {
        assert!(line(dec!(0), dec!(10), dec!(0)).validate().is_err());
        assert!(line(dec!(-1), dec!(10), dec!(0)).validate().is_err());
    }

    #[test]
    fn accepts_zero_price_and_boundary_rates() {
        assert!(line(dec!(1), dec!(0), dec!(0)).validate().is_ok());
        assert!(line(dec!(1), dec!(10), dec!(100)).validate().is_ok());
        assert!(line(dec!(1), dec!(10), dec!(100.01)).validate().is_err());
        assert!(line(dec!(1), dec!(10), dec!(-0.5)).validate().is_err());
    }

    #[test]
    fn rejects_amounts_beyond_ten_integer_digits() {
        let huge = Decimal::MAX;
        assert!(matches!(
            line(huge, dec!(10), dec!(0)).validate(),
            Err(DomainError::Validation(_))
        ));
        assert!(line(dec!(1), dec!(10000000000), dec!(0)).validate().is_err());
        assert!(line(dec!(9999999999.9999), dec!(9999999999.9999), dec!(100)).validate().is_ok());
    }

    #[test]
    fn rejects_excess_scale() {
        assert!(line(dec!(1), dec!(0.00005), dec!(0)).validate().is_err());
        assert!(line(dec!(0.12345), dec!(1), dec!(0)).validate().is_err());
        assert!(line(dec!(1), dec!(10), dec!(7.725)).validate().is_err());
        // Trailing zeros do not count against the scale.
        assert!(line(dec!(1.50000), dec!(0.00010), dec!(7.700)).validate().is_ok());
        assert!(line(dec!(1), dec!(0.0001), dec!(7.72)).validate().is_ok());
    }

    #[test]
    fn largest_accepted_line_totals_without_overflow() {
        let max = dec!(9999999999.9999);
        let input = line(max, max, dec!(100));
        assert!(input.validate().is_ok());
        let totals = crate::totals::calculate_totals(&[input.clone(), input.clone(), input.clone()]);
        assert!(totals.total > totals.subtotal);
        assert!(invoice_line_total(&input) > Decimal::ZERO);
    }

    #[test]
    fn invoice_line_total_rounds_per_line() {
        // 3 * 33.33 * 1.081 = 108.08919
        assert_eq!(invoice_line_total(&line(dec!(3), dec!(33.33), dec!(8.1))), dec!(108.09));
        // 1 * 0.05 * 1.1 = 0.055 -> half away from zero
        assert_eq!(invoice_line_total(&line(dec!(1), dec!(0.05), dec!(10))), dec!(0.06));
    }

    #[test]
    fn from_input_only_stores_line_total_when_asked() {
        let doc = DocumentId::new();
        let input = line(dec!(2), dec!(100), dec!(8.1));
        assert_eq!(LineItem::from_input(doc, 1, &input, true).line_total, Some(dec!(216.20)));
        assert_eq!(LineItem::from_input(doc, 1, &input, false).line_total, None);
    }
}
