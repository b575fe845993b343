//! Document services: the operations exposed to callers.
//!
//! Every operation is a short-lived unit of work scoped to one owner. Ownership
//! is checked here, not in the store: a document that exists but belongs to
//! someone else is an `Authorization` error, an absent or soft-deleted one is
//! `NotFound`.

use chrono::Utc;
use std::sync::Arc;
use tracing::instrument;

use tally_core::{DocumentId, OwnerId};
use tally_documents::{Document, DocumentStatus, LineItem};

use crate::config::ServiceSettings;
use crate::error::{ServiceError, ServiceResult};
use crate::notify::NotificationSink;
use crate::processor::PaymentProcessor;
use crate::saga::{CreatedDocument, DocumentCreationSaga, NewDocument};
use crate::store::DocumentStore;

pub mod conversion;
pub mod overdue;
pub mod payment_link;
pub mod reconciliation;

pub use overdue::SweepReport;
pub use payment_link::PaymentLink;
pub use reconciliation::ReconcileOutcome;

#[derive(Clone)]
pub struct DocumentServices {
    store: Arc<dyn DocumentStore>,
    processor: Arc<dyn PaymentProcessor>,
    notifier: Arc<dyn NotificationSink>,
    settings: ServiceSettings,
}

impl DocumentServices {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        processor: Arc<dyn PaymentProcessor>,
        notifier: Arc<dyn NotificationSink>,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            store,
            processor,
            notifier,
            settings,
        }
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    /// Create a document header with its line items.
    pub async fn create_document(
        &self,
        owner_id: OwnerId,
        request: NewDocument,
    ) -> ServiceResult<CreatedDocument> {
        self.creation_saga().run(owner_id, request, Utc::now()).await
    }

    fn creation_saga(&self) -> DocumentCreationSaga<'_> {
        DocumentCreationSaga::new(self.store.as_ref(), self.settings.number_max_attempts)
    }

    #[instrument(skip(self), fields(owner_id = %owner_id, document_id = %id), err)]
    pub async fn get_document(
        &self,
        owner_id: OwnerId,
        id: DocumentId,
    ) -> ServiceResult<(Document, Vec<LineItem>)> {
        let document = self.load_owned(owner_id, id, "get_document").await?;
        let items = self
            .store
            .list_line_items(id)
            .await
            .map_err(|e| ServiceError::upstream("list_line_items", e))?;
        Ok((document, items))
    }

    /// Move a document along its lifecycle. The paid transition is reserved to
    /// reconciliation and the overdue one to the sweeper.
    #[instrument(skip(self), fields(owner_id = %owner_id, document_id = %id, to = %next), err)]
    pub async fn transition_status(
        &self,
        owner_id: OwnerId,
        id: DocumentId,
        next: DocumentStatus,
    ) -> ServiceResult<Document> {
        use tally_documents::InvoiceStatus;

        if matches!(
            next,
            DocumentStatus::Invoice(InvoiceStatus::Paid | InvoiceStatus::Overdue)
        ) {
            return Err(ServiceError::validation(format!(
                "invoices become {next} through payment reconciliation or the overdue sweep"
            )));
        }

        let mut document = self.load_owned(owner_id, id, "transition_status").await?;
        let current = document.status;
        current.transition(next)?;

        let now = Utc::now();
        let applied = self
            .store
            .update_status(id, current, next, now)
            .await
            .map_err(|e| ServiceError::upstream("update_status", e))?;
        if !applied {
            return Err(ServiceError::validation(format!(
                "document {} changed concurrently; status is no longer {current}",
                document.number
            )));
        }

        document.status = next;
        document.updated_at = now;
        Ok(document)
    }

    /// Load a live document and check it belongs to `owner_id`.
    async fn load_owned(
        &self,
        owner_id: OwnerId,
        id: DocumentId,
        operation: &'static str,
    ) -> ServiceResult<Document> {
        let document = self
            .store
            .get_document(id)
            .await
            .map_err(|e| ServiceError::upstream(operation, e))?;
        match document {
            Some(d) if d.is_deleted() => Err(ServiceError::not_found(format!("document {id}"))),
            Some(d) if d.owner_id != owner_id => Err(ServiceError::authorization(format!(
                "document {id} belongs to another account"
            ))),
            Some(d) => Ok(d),
            None => Err(ServiceError::not_found(format!("document {id}"))),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;
    use tally_core::CounterpartyId;
    use tally_documents::{
        Counterparty, CounterpartyRole, DocumentHeader, DocumentKind, LineItemInput,
        MerchantProfile,
    };

    use crate::notify::RecordingNotificationSink;
    use crate::processor::InMemoryProcessor;
    use crate::store::InMemoryDocumentStore;

    pub struct Harness {
        pub store: Arc<InMemoryDocumentStore>,
        pub processor: Arc<InMemoryProcessor>,
        pub notifier: Arc<RecordingNotificationSink>,
        pub services: DocumentServices,
        pub owner: OwnerId,
        pub client: CounterpartyId,
    }

    pub fn harness_with(settings: ServiceSettings) -> Harness {
        let store = Arc::new(InMemoryDocumentStore::new());
        let processor = Arc::new(InMemoryProcessor::new());
        let notifier = Arc::new(RecordingNotificationSink::new());
        let owner = OwnerId::new();
        let client = CounterpartyId::new();

        store.upsert_counterparty(Counterparty {
            id: client,
            owner_id: owner,
            name: "Acme GmbH".into(),
            email: Some("billing@acme.test".into()),
            role: CounterpartyRole::Client,
        });
        store.upsert_merchant_profile(MerchantProfile {
            owner_id: owner,
            currency: "eur".into(),
            connected_account_id: Some("acct_owner".into()),
            charges_enabled: true,
            notification_email: Some("owner@tally.test".into()),
        });

        let services = DocumentServices::new(
            store.clone(),
            processor.clone(),
            notifier.clone(),
            settings,
        );
        Harness {
            store,
            processor,
            notifier,
            services,
            owner,
            client,
        }
    }

    pub fn harness() -> Harness {
        harness_with(ServiceSettings::default())
    }

    impl Harness {
        pub fn header(&self, kind: DocumentKind) -> DocumentHeader {
            let issue = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
            DocumentHeader {
                kind,
                counterparty_id: self.client,
                issue_date: issue,
                secondary_date: Some(issue + chrono::Duration::days(30)),
                notes: None,
            }
        }

        pub fn items(&self) -> Vec<LineItemInput> {
            vec![LineItemInput::new("Consulting", dec!(2), dec!(100), dec!(8.1))]
        }

        pub async fn create(&self, kind: DocumentKind) -> Document {
            self.services
                .create_document(self.owner, NewDocument::computed(self.header(kind), self.items()))
                .await
                .unwrap()
                .document
        }

        /// Force a status without the state machine.
        pub fn force_status(&self, document: &Document, status: DocumentStatus) -> Document {
            let mut doc = document.clone();
            doc.status = status;
            self.store.put_document(doc.clone());
            doc
        }
    }
}
