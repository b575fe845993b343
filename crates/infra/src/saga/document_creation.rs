//! Document creation saga.
//!
//! Orchestrates the flow:
//! 1. Validate items and the counterparty (no writes yet)
//! 2. Compute totals, or carry them over verbatim
//! 3. Allocate a number and insert the header (retried on number collision)
//! 4. Insert all line items
//!
//! Compensating action: delete the header if step 4 fails. A failed
//! compensation leaves an orphaned header and is reported as an inconsistency.

use chrono::{DateTime, Utc};
use tracing::instrument;

use tally_core::OwnerId;
use tally_documents::{
    Document, DocumentHeader, DocumentKind, LineItem, LineItemInput, Totals, calculate_totals,
    next_number,
};

use crate::error::{ServiceError, ServiceResult, UpstreamError};
use crate::store::{DocumentStore, StoreError};

/// Where the header totals come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TotalsSource {
    /// Run the Totals Calculator over the items.
    Computed,
    /// Use these figures as-is (quote conversion).
    CarriedOver(Totals),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDocument {
    pub header: DocumentHeader,
    pub items: Vec<LineItemInput>,
    pub totals: TotalsSource,
}

impl NewDocument {
    pub fn computed(header: DocumentHeader, items: Vec<LineItemInput>) -> Self {
        Self {
            header,
            items,
            totals: TotalsSource::Computed,
        }
    }
}

/// A header together with the items that were persisted with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedDocument {
    pub document: Document,
    pub items: Vec<LineItem>,
}

pub struct DocumentCreationSaga<'a> {
    store: &'a dyn DocumentStore,
    number_max_attempts: u32,
}

impl<'a> DocumentCreationSaga<'a> {
    pub fn new(store: &'a dyn DocumentStore, number_max_attempts: u32) -> Self {
        Self {
            store,
            number_max_attempts: number_max_attempts.max(1),
        }
    }

    #[instrument(
        skip(self, request),
        fields(owner_id = %owner_id, kind = %request.header.kind, items = request.items.len()),
        err
    )]
    pub async fn run(
        &self,
        owner_id: OwnerId,
        request: NewDocument,
        now: DateTime<Utc>,
    ) -> ServiceResult<CreatedDocument> {
        self.validate(owner_id, &request).await?;

        let totals = match request.totals {
            TotalsSource::Computed => calculate_totals(&request.items),
            TotalsSource::CarriedOver(totals) => totals,
        };

        let document = self.insert_header(owner_id, &request.header, totals, now).await?;

        let with_line_total = document.kind == DocumentKind::Invoice;
        let items: Vec<LineItem> = request
            .items
            .iter()
            .zip(1u32..)
            .map(|(input, position)| LineItem::from_input(document.id, position, input, with_line_total))
            .collect();

        if let Err(insert_err) = self.store.insert_line_items(&items).await {
            return Err(self.compensate(&document, insert_err).await);
        }

        tracing::info!(document_id = %document.id, number = %document.number, "document created");
        Ok(CreatedDocument { document, items })
    }

    async fn validate(&self, owner_id: OwnerId, request: &NewDocument) -> ServiceResult<()> {
        if request.items.is_empty() {
            return Err(ServiceError::validation("a document needs at least one line item"));
        }
        for (idx, item) in request.items.iter().enumerate() {
            item.validate()
                .map_err(|e| ServiceError::validation(format!("line {}: {}", idx + 1, e)))?;
        }
        if let Some(secondary) = request.header.secondary_date {
            if secondary < request.header.issue_date {
                return Err(ServiceError::validation(
                    "secondary date must not precede the issue date",
                ));
            }
        }

        let counterparty = self
            .store
            .find_counterparty(request.header.counterparty_id)
            .await
            .map_err(|e| ServiceError::upstream("find_counterparty", e))?;
        let counterparty = match counterparty {
            Some(c) if c.owner_id == owner_id => c,
            _ => {
                return Err(ServiceError::authorization(format!(
                    "counterparty {} is not available to this account",
                    request.header.counterparty_id
                )));
            }
        };

        let expected = request.header.kind.counterparty_role();
        if counterparty.role != expected {
            return Err(ServiceError::validation(format!(
                "a {} needs a {} counterparty, {} is a {}",
                request.header.kind,
                expected.as_str(),
                counterparty.name,
                counterparty.role.as_str()
            )));
        }
        Ok(())
    }

    async fn insert_header(
        &self,
        owner_id: OwnerId,
        header: &DocumentHeader,
        totals: Totals,
        now: DateTime<Utc>,
    ) -> ServiceResult<Document> {
        for attempt in 1..=self.number_max_attempts {
            let number = next_number(header.kind).into_string();
            let document = Document::draft(owner_id, header, number, totals, now);
            match self.store.insert_document(&document).await {
                Ok(()) => return Ok(document),
                Err(StoreError::UniqueViolation(detail)) => {
                    tracing::debug!(attempt, number = %document.number, %detail, "document number taken, retrying");
                }
                Err(e) => return Err(ServiceError::upstream("insert_document", e)),
            }
        }
        Err(ServiceError::upstream(
            "insert_document",
            UpstreamError::NumberSpaceExhausted {
                attempts: self.number_max_attempts,
            },
        ))
    }

    /// Undo the header insert after the items failed.
    async fn compensate(&self, document: &Document, cause: StoreError) -> ServiceError {
        match self.store.delete_document(document.id).await {
            Ok(()) => {
                tracing::warn!(
                    document_id = %document.id,
                    number = %document.number,
                    error = %cause,
                    "line item insert failed; header removed"
                );
                ServiceError::upstream("insert_line_items", cause)
            }
            Err(delete_err) => ServiceError::inconsistency(
                "create_document",
                Some(document.id),
                format!(
                    "line items failed ({cause}) and the compensating delete of header {} failed ({delete_err})",
                    document.number
                ),
                "delete the orphaned document header by hand",
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;
    use tally_core::CounterpartyId;
    use tally_documents::{Counterparty, CounterpartyRole};

    use crate::store::InMemoryDocumentStore;

    struct Fixture {
        store: InMemoryDocumentStore,
        owner: OwnerId,
        client: CounterpartyId,
        supplier: CounterpartyId,
    }

    fn fixture() -> Fixture {
        let store = InMemoryDocumentStore::new();
        let owner = OwnerId::new();
        let client = CounterpartyId::new();
        let supplier = CounterpartyId::new();
        for (id, role) in [(client, CounterpartyRole::Client), (supplier, CounterpartyRole::Supplier)] {
            store.upsert_counterparty(Counterparty {
                id,
                owner_id: owner,
                name: format!("{} ltd", role.as_str()),
                email: None,
                role,
            });
        }
        Fixture {
            store,
            owner,
            client,
            supplier,
        }
    }

    fn header(kind: DocumentKind, counterparty_id: CounterpartyId) -> DocumentHeader {
        DocumentHeader {
            kind,
            counterparty_id,
            issue_date: NaiveDate::from_ymd_opt(2024, 3, 5).unwrap(),
            secondary_date: NaiveDate::from_ymd_opt(2024, 4, 4),
            notes: None,
        }
    }

    fn items() -> Vec<LineItemInput> {
        vec![
            LineItemInput::new("Consulting", dec!(2), dec!(100), dec!(8.1)),
            LineItemInput::new("Travel", dec!(1), dec!(45.5), dec!(0)),
        ]
    }

    #[tokio::test]
    async fn creates_header_and_items_with_computed_totals() {
        let f = fixture();
        let saga = DocumentCreationSaga::new(&f.store, 5);

        let created = saga
            .run(f.owner, NewDocument::computed(header(DocumentKind::Invoice, f.client), items()), Utc::now())
            .await
            .unwrap();

        assert_eq!(created.document.totals.subtotal, dec!(245.50));
        assert_eq!(created.document.totals.tax, dec!(16.20));
        assert_eq!(created.document.totals.total, dec!(261.70));
        assert!(created.document.number.starts_with("INV-"));
        assert_eq!(created.items.len(), 2);
        assert_eq!(created.items[0].position, 1);
        assert_eq!(created.items[0].line_total, Some(dec!(216.20)));

        let stored = f.store.list_line_items(created.document.id).await.unwrap();
        assert_eq!(stored.len(), 2);
    }

    #[tokio::test]
    async fn quote_items_carry_no_line_total() {
        let f = fixture();
        let saga = DocumentCreationSaga::new(&f.store, 5);
        let created = saga
            .run(f.owner, NewDocument::computed(header(DocumentKind::Quote, f.client), items()), Utc::now())
            .await
            .unwrap();
        assert!(created.items.iter().all(|i| i.line_total.is_none()));
    }

    #[tokio::test]
    async fn empty_items_are_rejected_before_any_write() {
        let f = fixture();
        let saga = DocumentCreationSaga::new(&f.store, 5);
        let err = saga
            .run(f.owner, NewDocument::computed(header(DocumentKind::Invoice, f.client), vec![]), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
        assert_eq!(f.store.document_count(), 0);
    }

    #[tokio::test]
    async fn unstorable_amounts_are_rejected_before_any_write() {
        let f = fixture();
        let saga = DocumentCreationSaga::new(&f.store, 5);
        let cases = [
            LineItemInput::new("Overflow", rust_decimal::Decimal::MAX, dec!(10), dec!(0)),
            LineItemInput::new("Sub-cent", dec!(1), dec!(0.00005), dec!(0)),
            LineItemInput::new("Odd rate", dec!(1), dec!(10), dec!(7.725)),
        ];
        for item in cases {
            let err = saga
                .run(
                    f.owner,
                    NewDocument::computed(header(DocumentKind::Invoice, f.client), vec![item]),
                    Utc::now(),
                )
                .await
                .unwrap_err();
            assert!(matches!(err, ServiceError::Validation(_)), "{err:?}");
        }
        assert_eq!(f.store.document_count(), 0);
    }

    #[tokio::test]
    async fn foreign_or_unknown_counterparty_is_an_authorization_error() {
        let f = fixture();
        let saga = DocumentCreationSaga::new(&f.store, 5);

        let err = saga
            .run(OwnerId::new(), NewDocument::computed(header(DocumentKind::Invoice, f.client), items()), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Authorization(_)));

        let err = saga
            .run(f.owner, NewDocument::computed(header(DocumentKind::Invoice, CounterpartyId::new()), items()), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Authorization(_)));
    }

    #[tokio::test]
    async fn purchase_orders_need_a_supplier() {
        let f = fixture();
        let saga = DocumentCreationSaga::new(&f.store, 5);
        let err = saga
            .run(f.owner, NewDocument::computed(header(DocumentKind::PurchaseOrder, f.client), items()), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));

        let ok = saga
            .run(f.owner, NewDocument::computed(header(DocumentKind::PurchaseOrder, f.supplier), items()), Utc::now())
            .await
            .unwrap();
        assert!(ok.document.number.starts_with("PO-"));
    }

    #[tokio::test]
    async fn failed_item_insert_removes_the_header() {
        let f = fixture();
        f.store.faults().fail_item_inserts(true);
        let saga = DocumentCreationSaga::new(&f.store, 5);

        let err = saga
            .run(f.owner, NewDocument::computed(header(DocumentKind::Invoice, f.client), items()), Utc::now())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ServiceError::Upstream { operation: "insert_line_items", source: UpstreamError::Store(_) }
        ));
        assert_eq!(f.store.document_count(), 0);
    }

    #[tokio::test]
    async fn failed_compensation_is_an_inconsistency() {
        let f = fixture();
        f.store.faults().fail_item_inserts(true);
        f.store.faults().fail_deletes(true);
        let saga = DocumentCreationSaga::new(&f.store, 5);

        let err = saga
            .run(f.owner, NewDocument::computed(header(DocumentKind::Invoice, f.client), items()), Utc::now())
            .await
            .unwrap_err();

        match err {
            ServiceError::Inconsistency(inc) => {
                assert_eq!(inc.operation, "create_document");
                assert!(inc.document_id.is_some());
            }
            other => panic!("expected inconsistency, got {other:?}"),
        }
        assert_eq!(f.store.document_count(), 1);
    }

    #[tokio::test]
    async fn number_collisions_are_retried() {
        let f = fixture();
        f.store.faults().force_number_collisions(2);
        let saga = DocumentCreationSaga::new(&f.store, 3);

        let created = saga
            .run(f.owner, NewDocument::computed(header(DocumentKind::Invoice, f.client), items()), Utc::now())
            .await;
        assert!(created.is_ok());
    }

    #[tokio::test]
    async fn exhausted_number_attempts_fail_upstream() {
        let f = fixture();
        f.store.faults().force_number_collisions(10);
        let saga = DocumentCreationSaga::new(&f.store, 3);

        let err = saga
            .run(f.owner, NewDocument::computed(header(DocumentKind::Invoice, f.client), items()), Utc::now())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "number_allocation_failed");
        assert_eq!(f.store.document_count(), 0);
    }

    #[tokio::test]
    async fn carried_over_totals_are_not_recomputed() {
        let f = fixture();
        let saga = DocumentCreationSaga::new(&f.store, 5);
        let agreed = Totals {
            subtotal: dec!(245.50),
            tax: dec!(16.20),
            total: dec!(261.70),
        };
        let request = NewDocument {
            header: header(DocumentKind::Invoice, f.client),
            items: vec![LineItemInput::new("Anything", dec!(1), dec!(1), dec!(0))],
            totals: TotalsSource::CarriedOver(agreed),
        };
        let created = saga.run(f.owner, request, Utc::now()).await.unwrap();
        assert_eq!(created.document.totals, agreed);
    }
}
