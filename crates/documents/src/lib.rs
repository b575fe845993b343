//! Commercial documents domain module.
//!
//! This crate contains the business rules for quotes, invoices and purchase
//! orders, implemented purely as deterministic domain logic (no IO, no HTTP,
//! no storage): totals, numbering, status machines, the paid-transition
//! decision and quote-to-invoice planning.

pub mod conversion;
pub mod document;
pub mod line_item;
pub mod numbering;
pub mod payment;
pub mod totals;

pub use conversion::{InvoicePlan, plan_invoice_from_quote};
pub use document::{
    Counterparty, CounterpartyRole, Document, DocumentHeader, DocumentKind, DocumentStatus,
    InvoiceStatus,
    PaymentRecord, PaymentStatus, PurchaseOrderStatus, QuoteStatus,
};
pub use line_item::{LineItem, LineItemInput, invoice_line_total};
pub use numbering::{DocumentNumber, generate_number, next_number};
pub use payment::{
    MerchantProfile, PaymentDecision, SessionPaymentStatus, decide_payment, to_minor_units,
};
pub use totals::{Priced, Totals, calculate_totals, round_money};
