//! Quote → invoice planning (pure part of the converter).

use chrono::{Duration, NaiveDate};

use tally_core::{DomainError, DomainResult};

use crate::document::{Document, DocumentHeader, DocumentKind, DocumentStatus, QuoteStatus};
use crate::line_item::{LineItem, LineItemInput};
use crate::totals::Totals;

pub const DEFAULT_PAYMENT_TERMS_DAYS: i64 = 30;

/// Everything needed to persist the invoice derived from an accepted quote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoicePlan {
    pub header: DocumentHeader,
    /// Copied 1:1 from the quote, in quote order.
    pub items: Vec<LineItemInput>,
    /// Carried over verbatim from the quote header, never recomputed.
    pub totals: Totals,
}

pub fn plan_invoice_from_quote(
    quote: &Document,
    quote_items: &[LineItem],
    issue_date: NaiveDate,
    payment_terms_days: i64,
) -> DomainResult<InvoicePlan> {
    if quote.kind != DocumentKind::Quote {
        return Err(DomainError::validation(format!(
            "document {} is a {}, not a quote",
            quote.number, quote.kind
        )));
    }
    if quote.status != DocumentStatus::Quote(QuoteStatus::Accepted) {
        return Err(DomainError::validation(format!(
            "quote {} is {}; only accepted quotes can be converted",
            quote.number, quote.status
        )));
    }
    if quote_items.is_empty() {
        return Err(DomainError::validation(format!(
            "quote {} has no line items",
            quote.number
        )));
    }

    let mut ordered: Vec<&LineItem> = quote_items.iter().collect();
    ordered.sort_by_key(|item| item.position);

    Ok(InvoicePlan {
        header: DocumentHeader {
            kind: DocumentKind::Invoice,
            counterparty_id: quote.counterparty_id,
            issue_date,
            secondary_date: Some(issue_date + Duration::days(payment_terms_days)),
            notes: Some(format!("Created from quote {}", quote.number)),
        },
        items: ordered.into_iter().map(LineItem::to_input).collect(),
        totals: quote.totals,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use tally_core::{CounterpartyId, OwnerId};

    use crate::totals::calculate_totals;

    fn quote_with(status: QuoteStatus) -> (Document, Vec<LineItem>) {
        let inputs = vec![
            LineItemInput::new("Design", dec!(3), dec!(33.33), dec!(8.1)),
            LineItemInput::new("Hosting", dec!(1), dec!(20), dec!(0)),
        ];
        let header = DocumentHeader {
            kind: DocumentKind::Quote,
            counterparty_id: CounterpartyId::new(),
            issue_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            secondary_date: None,
            notes: None,
        };
        let mut quote = Document::draft(
            OwnerId::new(),
            &header,
            "QT-202403-042".into(),
            calculate_totals(&inputs),
            Utc::now(),
        );
        quote.status = DocumentStatus::Quote(status);
        // Stored out of order on purpose.
        let items = vec![
            LineItem::from_input(quote.id, 2, &inputs[1], false),
            LineItem::from_input(quote.id, 1, &inputs[0], false),
        ];
        (quote, items)
    }

    #[test]
    fn accepted_quote_becomes_a_draft_invoice_due_in_thirty_days() {
        let (quote, items) = quote_with(QuoteStatus::Accepted);
        let today = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        let plan = plan_invoice_from_quote(&quote, &items, today, DEFAULT_PAYMENT_TERMS_DAYS).unwrap();

        assert_eq!(plan.header.kind, DocumentKind::Invoice);
        assert_eq!(plan.header.counterparty_id, quote.counterparty_id);
        assert_eq!(plan.header.secondary_date, NaiveDate::from_ymd_opt(2024, 4, 9));
        assert_eq!(plan.header.notes.as_deref(), Some("Created from quote QT-202403-042"));
        assert_eq!(plan.totals, quote.totals);
        assert_eq!(plan.items.len(), 2);
        assert_eq!(plan.items[0].description, "Design");
    }

    #[test]
    fn non_accepted_quotes_are_rejected() {
        for status in [QuoteStatus::Draft, QuoteStatus::Sent, QuoteStatus::Rejected, QuoteStatus::Expired] {
            let (quote, items) = quote_with(status);
            let err = plan_invoice_from_quote(&quote, &items, Utc::now().date_naive(), 30).unwrap_err();
            assert!(matches!(err, DomainError::Validation(msg) if msg.contains("only accepted")));
        }
    }

    #[test]
    fn quote_without_items_is_rejected() {
        let (quote, _) = quote_with(QuoteStatus::Accepted);
        let err = plan_invoice_from_quote(&quote, &[], Utc::now().date_naive(), 30).unwrap_err();
        assert!(matches!(err, DomainError::Validation(msg) if msg.contains("no line items")));
    }
}
