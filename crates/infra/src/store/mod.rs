//! Document Store Gateway.
//!
//! The narrow contract the services use against the relational store. The store
//! is assumed to offer atomic single-row writes and filtered reads only: there
//! is no transaction spanning a header and its line items, which is why document
//! creation runs as a saga with a compensating delete.
//!
//! ## Conditional writes
//!
//! Every mutation of an existing header is a single guarded statement
//! (check-and-set). The guard is part of the write, not a preceding read:
//!
//! | Operation | Guard |
//! |-----------|-------|
//! | `record_checkout_session` | payment status is not `paid` |
//! | `mark_paid` | payment status is not `paid` |
//! | `update_status` | current status equals the expected one |
//! | `mark_overdue` | invoice, status `issued`, not soft-deleted |
//!
//! A guarded write that matches nothing is not an error; it reports `false` (or
//! an empty result) and the caller decides what that means.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::sync::Arc;
use thiserror::Error;

use tally_core::{CounterpartyId, DocumentId, OwnerId};
use tally_documents::{Counterparty, Document, DocumentStatus, LineItem, MerchantProfile};

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryDocumentStore;
pub use postgres::PostgresDocumentStore;

pub type StoreResult<T> = Result<T, StoreError>;

/// Store operation error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A unique constraint rejected the write (e.g. a colliding document number).
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("row not found: {0}")]
    NotFound(String),

    /// Connection, query or decoding failure.
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Checkout session details persisted on an invoice once a payment link exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutLink {
    pub account_id: String,
    pub session_id: String,
    pub checkout_url: String,
}

/// Values written by the paid transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaidUpdate {
    pub payment_reference: Option<String>,
    pub paid_at: DateTime<Utc>,
}

/// An invoice moved to `overdue` by a sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverdueMark {
    pub id: DocumentId,
    pub number: String,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn find_counterparty(&self, id: CounterpartyId) -> StoreResult<Option<Counterparty>>;

    async fn merchant_profile(&self, owner_id: OwnerId) -> StoreResult<Option<MerchantProfile>>;

    /// Insert a header. A number already used by the same owner and kind is a
    /// `UniqueViolation`.
    async fn insert_document(&self, document: &Document) -> StoreResult<()>;

    async fn insert_line_items(&self, items: &[LineItem]) -> StoreResult<()>;

    /// Physically remove a header and any items already attached to it.
    ///
    /// Only used as the compensating step of a failed creation. Deleting a
    /// header that does not exist succeeds.
    async fn delete_document(&self, id: DocumentId) -> StoreResult<()>;

    /// Load a header regardless of owner or soft-delete marker; callers scope it.
    async fn get_document(&self, id: DocumentId) -> StoreResult<Option<Document>>;

    async fn find_document_by_session(&self, session_id: &str) -> StoreResult<Option<Document>>;

    /// Items of a header, ordered by position.
    async fn list_line_items(&self, document_id: DocumentId) -> StoreResult<Vec<LineItem>>;

    /// Persist session details and set the payment status to `pending`.
    /// Returns `false` when the invoice is already paid (nothing written).
    async fn record_checkout_session(
        &self,
        id: DocumentId,
        link: &CheckoutLink,
        at: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// The paid transition: status and payment status become `paid`, the
    /// timestamp and payment reference are stamped, all in one write.
    /// Returns `false` when the invoice was already paid.
    async fn mark_paid(&self, id: DocumentId, update: &PaidUpdate) -> StoreResult<bool>;

    /// Compare-and-set of the lifecycle status.
    async fn update_status(
        &self,
        id: DocumentId,
        expected: DocumentStatus,
        next: DocumentStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Live issued invoices of `owner_id` whose due date is strictly before `today`.
    async fn find_overdue_candidates(
        &self,
        owner_id: OwnerId,
        today: NaiveDate,
    ) -> StoreResult<Vec<Document>>;

    /// Batch transition of the given invoices to `overdue`. Rows that stopped
    /// qualifying since they were read are skipped.
    async fn mark_overdue(
        &self,
        owner_id: OwnerId,
        ids: &[DocumentId],
        at: DateTime<Utc>,
    ) -> StoreResult<Vec<OverdueMark>>;
}

#[async_trait]
impl<S> DocumentStore for Arc<S>
where
    S: DocumentStore + ?Sized,
{
    async fn find_counterparty(&self, id: CounterpartyId) -> StoreResult<Option<Counterparty>> {
        (**self).find_counterparty(id).await
    }

    async fn merchant_profile(&self, owner_id: OwnerId) -> StoreResult<Option<MerchantProfile>> {
        (**self).merchant_profile(owner_id).await
    }

    async fn insert_document(&self, document: &Document) -> StoreResult<()> {
        (**self).insert_document(document).await
    }

    async fn insert_line_items(&self, items: &[LineItem]) -> StoreResult<()> {
        (**self).insert_line_items(items).await
    }

    async fn delete_document(&self, id: DocumentId) -> StoreResult<()> {
        (**self).delete_document(id).await
    }

    async fn get_document(&self, id: DocumentId) -> StoreResult<Option<Document>> {
        (**self).get_document(id).await
    }

    async fn find_document_by_session(&self, session_id: &str) -> StoreResult<Option<Document>> {
        (**self).find_document_by_session(session_id).await
    }

    async fn list_line_items(&self, document_id: DocumentId) -> StoreResult<Vec<LineItem>> {
        (**self).list_line_items(document_id).await
    }

    async fn record_checkout_session(
        &self,
        id: DocumentId,
        link: &CheckoutLink,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        (**self).record_checkout_session(id, link, at).await
    }

    async fn mark_paid(&self, id: DocumentId, update: &PaidUpdate) -> StoreResult<bool> {
        (**self).mark_paid(id, update).await
    }

    async fn update_status(
        &self,
        id: DocumentId,
        expected: DocumentStatus,
        next: DocumentStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        (**self).update_status(id, expected, next, at).await
    }

    async fn find_overdue_candidates(
        &self,
        owner_id: OwnerId,
        today: NaiveDate,
    ) -> StoreResult<Vec<Document>> {
        (**self).find_overdue_candidates(owner_id, today).await
    }

    async fn mark_overdue(
        &self,
        owner_id: OwnerId,
        ids: &[DocumentId],
        at: DateTime<Utc>,
    ) -> StoreResult<Vec<OverdueMark>> {
        (**self).mark_overdue(owner_id, ids, at).await
    }
}
