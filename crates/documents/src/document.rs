use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use tally_core::{CounterpartyId, DocumentId, DomainError, DomainResult, Entity, OwnerId};

use crate::totals::Totals;

/// Document variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Quote,
    Invoice,
    PurchaseOrder,
}

impl DocumentKind {
    /// Fixed number prefix for this kind.
    pub fn prefix(self) -> &'static str {
        match self {
            DocumentKind::Quote => "QT",
            DocumentKind::Invoice => "INV",
            DocumentKind::PurchaseOrder => "PO",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DocumentKind::Quote => "quote",
            DocumentKind::Invoice => "invoice",
            DocumentKind::PurchaseOrder => "purchase_order",
        }
    }

    pub fn parse(s: &str) -> DomainResult<Self> {
        match s {
            "quote" => Ok(DocumentKind::Quote),
            "invoice" => Ok(DocumentKind::Invoice),
            "purchase_order" => Ok(DocumentKind::PurchaseOrder),
            other => Err(DomainError::validation(format!("unknown document kind: {other}"))),
        }
    }

    /// Quotes and invoices go to clients; purchase orders go to suppliers.
    pub fn counterparty_role(self) -> CounterpartyRole {
        match self {
            DocumentKind::Quote | DocumentKind::Invoice => CounterpartyRole::Client,
            DocumentKind::PurchaseOrder => CounterpartyRole::Supplier,
        }
    }

    pub fn initial_status(self) -> DocumentStatus {
        match self {
            DocumentKind::Quote => DocumentStatus::Quote(QuoteStatus::Draft),
            DocumentKind::Invoice => DocumentStatus::Invoice(InvoiceStatus::Draft),
            DocumentKind::PurchaseOrder => DocumentStatus::PurchaseOrder(PurchaseOrderStatus::Draft),
        }
    }
}

impl core::fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Quote status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuoteStatus {
    Draft,
    Sent,
    Accepted,
    Rejected,
    Expired,
    Cancelled,
}

impl QuoteStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            QuoteStatus::Draft => "draft",
            QuoteStatus::Sent => "sent",
            QuoteStatus::Accepted => "accepted",
            QuoteStatus::Rejected => "rejected",
            QuoteStatus::Expired => "expired",
            QuoteStatus::Cancelled => "cancelled",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "draft" => QuoteStatus::Draft,
            "sent" => QuoteStatus::Sent,
            "accepted" => QuoteStatus::Accepted,
            "rejected" => QuoteStatus::Rejected,
            "expired" => QuoteStatus::Expired,
            "cancelled" => QuoteStatus::Cancelled,
            _ => return None,
        })
    }

    pub fn can_transition_to(self, next: QuoteStatus) -> bool {
        use QuoteStatus::*;
        matches!(
            (self, next),
            (Draft, Sent)
                | (Draft, Accepted)
                | (Sent, Accepted)
                | (Sent, Rejected)
                | (Sent, Expired)
                // Accepted is not terminal: it may be withdrawn before conversion.
                | (Draft | Sent | Accepted, Cancelled)
        )
    }
}

/// Invoice status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Draft,
    Issued,
    Overdue,
    Paid,
    Cancelled,
}

impl InvoiceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Issued => "issued",
            InvoiceStatus::Overdue => "overdue",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Cancelled => "cancelled",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "draft" => InvoiceStatus::Draft,
            "issued" => InvoiceStatus::Issued,
            "overdue" => InvoiceStatus::Overdue,
            "paid" => InvoiceStatus::Paid,
            "cancelled" => InvoiceStatus::Cancelled,
            _ => return None,
        })
    }

    /// Settlement is authoritative: money received moves any unpaid invoice to
    /// `paid`, including a cancelled one.
    pub fn can_transition_to(self, next: InvoiceStatus) -> bool {
        use InvoiceStatus::*;
        matches!(
            (self, next),
            (Draft, Issued)
                | (Issued, Overdue)
                | (Draft | Issued | Overdue | Cancelled, Paid)
                | (Draft | Issued | Overdue, Cancelled)
        )
    }
}

/// Purchase order status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PurchaseOrderStatus {
    Draft,
    Sent,
    Confirmed,
    Received,
    Cancelled,
}

impl PurchaseOrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PurchaseOrderStatus::Draft => "draft",
            PurchaseOrderStatus::Sent => "sent",
            PurchaseOrderStatus::Confirmed => "confirmed",
            PurchaseOrderStatus::Received => "received",
            PurchaseOrderStatus::Cancelled => "cancelled",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "draft" => PurchaseOrderStatus::Draft,
            "sent" => PurchaseOrderStatus::Sent,
            "confirmed" => PurchaseOrderStatus::Confirmed,
            "received" => PurchaseOrderStatus::Received,
            "cancelled" => PurchaseOrderStatus::Cancelled,
            _ => return None,
        })
    }

    pub fn can_transition_to(self, next: PurchaseOrderStatus) -> bool {
        use PurchaseOrderStatus::*;
        matches!(
            (self, next),
            (Draft, Sent) | (Sent, Confirmed) | (Confirmed, Received) | (Draft | Sent | Confirmed, Cancelled)
        )
    }
}

/// Status drawn from the closed set of the document's kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum DocumentStatus {
    Quote(QuoteStatus),
    Invoice(InvoiceStatus),
    PurchaseOrder(PurchaseOrderStatus),
}

impl DocumentStatus {
    pub fn kind(self) -> DocumentKind {
        match self {
            DocumentStatus::Quote(_) => DocumentKind::Quote,
            DocumentStatus::Invoice(_) => DocumentKind::Invoice,
            DocumentStatus::PurchaseOrder(_) => DocumentKind::PurchaseOrder,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DocumentStatus::Quote(s) => s.as_str(),
            DocumentStatus::Invoice(s) => s.as_str(),
            DocumentStatus::PurchaseOrder(s) => s.as_str(),
        }
    }

    /// Parse a stored status string in the context of its document kind.
    pub fn parse(kind: DocumentKind, s: &str) -> DomainResult<Self> {
        let parsed = match kind {
            DocumentKind::Quote => QuoteStatus::parse(s).map(DocumentStatus::Quote),
            DocumentKind::Invoice => InvoiceStatus::parse(s).map(DocumentStatus::Invoice),
            DocumentKind::PurchaseOrder => {
                PurchaseOrderStatus::parse(s).map(DocumentStatus::PurchaseOrder)
            }
        };
        parsed.ok_or_else(|| DomainError::validation(format!("unknown {kind} status: {s}")))
    }

    pub fn can_transition_to(self, next: DocumentStatus) -> bool {
        match (self, next) {
            (DocumentStatus::Quote(a), DocumentStatus::Quote(b)) => a.can_transition_to(b),
            (DocumentStatus::Invoice(a), DocumentStatus::Invoice(b)) => a.can_transition_to(b),
            (DocumentStatus::PurchaseOrder(a), DocumentStatus::PurchaseOrder(b)) => {
                a.can_transition_to(b)
            }
            _ => false,
        }
    }

    pub fn transition(self, next: DocumentStatus) -> DomainResult<DocumentStatus> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(DomainError::illegal_transition(self.as_str(), next.as_str()))
        }
    }
}

impl core::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Invoice payment progress. Moves forward only: `unset → pending → paid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    #[default]
    Unset,
    Pending,
    Paid,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Unset => "unset",
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
        }
    }

    pub fn parse(s: Option<&str>) -> DomainResult<Self> {
        match s {
            None | Some("unset") => Ok(PaymentStatus::Unset),
            Some("pending") => Ok(PaymentStatus::Pending),
            Some("paid") => Ok(PaymentStatus::Paid),
            Some(other) => Err(DomainError::validation(format!("unknown payment status: {other}"))),
        }
    }

    /// Re-entering `pending` is allowed (a new checkout session replaces the old one).
    pub fn can_advance_to(self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!((self, next), (Unset, Pending) | (Unset, Paid) | (Pending, Pending) | (Pending, Paid))
    }
}

/// Invoice-only payment sub-record.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PaymentRecord {
    /// Connected merchant sub-account the session was created under.
    pub account_id: Option<String>,
    pub session_id: Option<String>,
    pub checkout_url: Option<String>,
    /// Processor-assigned payment reference (payment intent id).
    pub payment_reference: Option<String>,
    pub status: PaymentStatus,
    pub paid_at: Option<DateTime<Utc>>,
}

/// Role a counterparty plays for its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CounterpartyRole {
    Client,
    Supplier,
}

impl CounterpartyRole {
    pub fn as_str(self) -> &'static str {
        match self {
            CounterpartyRole::Client => "client",
            CounterpartyRole::Supplier => "supplier",
        }
    }
}

/// Client or supplier record, owned by one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counterparty {
    pub id: CounterpartyId,
    pub owner_id: OwnerId,
    pub name: String,
    pub email: Option<String>,
    pub role: CounterpartyRole,
}

/// Document header.
///
/// After creation only `status`, `payment` and `deleted_at` change; totals and
/// items are fixed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Document {
    pub id: DocumentId,
    pub owner_id: OwnerId,
    pub kind: DocumentKind,
    pub number: String,
    pub counterparty_id: CounterpartyId,
    pub issue_date: NaiveDate,
    /// Validity date (quote), due date (invoice) or expected delivery (purchase order).
    pub secondary_date: Option<NaiveDate>,
    pub status: DocumentStatus,
    #[serde(flatten)]
    pub totals: Totals,
    pub notes: Option<String>,
    pub payment: Option<PaymentRecord>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Header fields a caller chooses; everything else is derived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentHeader {
    pub kind: DocumentKind,
    pub counterparty_id: CounterpartyId,
    pub issue_date: NaiveDate,
    pub secondary_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

impl Document {
    /// Build a header in the kind's initial status.
    pub fn draft(
        owner_id: OwnerId,
        header: &DocumentHeader,
        number: String,
        totals: Totals,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: DocumentId::new(),
            owner_id,
            kind: header.kind,
            number,
            counterparty_id: header.counterparty_id,
            issue_date: header.issue_date,
            secondary_date: header.secondary_date,
            status: header.kind.initial_status(),
            totals,
            notes: header.notes.clone(),
            payment: (header.kind == DocumentKind::Invoice).then(PaymentRecord::default),
            deleted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn is_invoice(&self) -> bool {
        self.kind == DocumentKind::Invoice
    }

    pub fn payment_status(&self) -> PaymentStatus {
        self.payment.as_ref().map(|p| p.status).unwrap_or_default()
    }

    /// Invoices only.
    pub fn due_date(&self) -> Option<NaiveDate> {
        if self.is_invoice() { self.secondary_date } else { None }
    }

    /// An issued, live invoice whose due date lies strictly before `today`.
    pub fn is_overdue_on(&self, today: NaiveDate) -> bool {
        self.status == DocumentStatus::Invoice(InvoiceStatus::Issued)
            && !self.is_deleted()
            && self.due_date().is_some_and(|due| due < today)
    }
}

impl Entity for Document {
    type Id = DocumentId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn invoice(status: InvoiceStatus, due: Option<NaiveDate>) -> Document {
        let today = Utc::now().date_naive();
        let header = DocumentHeader {
            kind: DocumentKind::Invoice,
            counterparty_id: CounterpartyId::new(),
            issue_date: today,
            secondary_date: due,
            notes: None,
        };
        let mut doc = Document::draft(OwnerId::new(), &header, "INV-202401-001".into(), Totals::zero(), Utc::now());
        doc.status = DocumentStatus::Invoice(status);
        doc
    }

    #[test]
    fn initial_status_is_draft_for_every_kind() {
        for kind in [DocumentKind::Quote, DocumentKind::Invoice, DocumentKind::PurchaseOrder] {
            assert_eq!(kind.initial_status().as_str(), "draft");
            assert_eq!(kind.initial_status().kind(), kind);
        }
    }

    #[test]
    fn only_invoices_carry_a_payment_record() {
        let header = DocumentHeader {
            kind: DocumentKind::Quote,
            counterparty_id: CounterpartyId::new(),
            issue_date: Utc::now().date_naive(),
            secondary_date: None,
            notes: None,
        };
        let quote = Document::draft(OwnerId::new(), &header, "QT-202401-001".into(), Totals::zero(), Utc::now());
        assert!(quote.payment.is_none());
        assert!(invoice(InvoiceStatus::Draft, None).payment.is_some());
    }

    #[test]
    fn status_parse_is_kind_scoped() {
        assert!(DocumentStatus::parse(DocumentKind::Quote, "accepted").is_ok());
        assert!(DocumentStatus::parse(DocumentKind::Invoice, "accepted").is_err());
        assert_eq!(
            DocumentStatus::parse(DocumentKind::Invoice, "overdue").unwrap(),
            DocumentStatus::Invoice(InvoiceStatus::Overdue)
        );
    }

    #[test]
    fn paid_is_terminal_for_invoices() {
        use InvoiceStatus::*;
        for next in [Draft, Issued, Overdue, Paid, Cancelled] {
            assert!(!Paid.can_transition_to(next));
        }
        assert!(Overdue.can_transition_to(Paid));
        assert!(!Overdue.can_transition_to(Issued));
    }

    #[test]
    fn accepted_quotes_can_still_be_withdrawn() {
        use QuoteStatus::*;
        assert!(Accepted.can_transition_to(Cancelled));
        for terminal in [Rejected, Expired, Cancelled] {
            for next in [Draft, Sent, Accepted, Rejected, Expired, Cancelled] {
                assert!(!terminal.can_transition_to(next), "{terminal:?} -> {next:?}");
            }
        }
    }

    #[test]
    fn cross_kind_transition_is_rejected() {
        let from = DocumentStatus::Quote(QuoteStatus::Accepted);
        let to = DocumentStatus::Invoice(InvoiceStatus::Draft);
        match from.transition(to) {
            Err(DomainError::IllegalTransition { from, to }) => {
                assert_eq!(from, "accepted");
                assert_eq!(to, "draft");
            }
            other => panic!("expected IllegalTransition, got {other:?}"),
        }
    }

    #[test]
    fn payment_status_never_regresses_from_paid() {
        use PaymentStatus::*;
        assert!(Unset.can_advance_to(Pending));
        assert!(Pending.can_advance_to(Paid));
        assert!(!Paid.can_advance_to(Pending));
        assert!(!Paid.can_advance_to(Paid));
        assert!(!Pending.can_advance_to(Unset));
    }

    #[test]
    fn overdue_detection_uses_strictly_earlier_due_date() {
        let today = Utc::now().date_naive();
        assert!(invoice(InvoiceStatus::Issued, Some(today - Duration::days(1))).is_overdue_on(today));
        assert!(!invoice(InvoiceStatus::Issued, Some(today)).is_overdue_on(today));
        assert!(!invoice(InvoiceStatus::Issued, Some(today + Duration::days(1))).is_overdue_on(today));
        assert!(!invoice(InvoiceStatus::Paid, Some(today - Duration::days(10))).is_overdue_on(today));
        assert!(!invoice(InvoiceStatus::Issued, None).is_overdue_on(today));

        let mut deleted = invoice(InvoiceStatus::Issued, Some(today - Duration::days(1)));
        deleted.deleted_at = Some(Utc::now());
        assert!(!deleted.is_overdue_on(today));
    }
}
