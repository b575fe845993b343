use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

use tally_core::{CounterpartyId, DocumentId, OwnerId};
use tally_documents::{
    Counterparty, Document, DocumentStatus, InvoiceStatus, LineItem, MerchantProfile,
    PaymentRecord, PaymentStatus,
};

use super::{CheckoutLink, DocumentStore, OverdueMark, PaidUpdate, StoreError, StoreResult};

#[derive(Debug, Default)]
struct State {
    counterparties: HashMap<CounterpartyId, Counterparty>,
    profiles: HashMap<OwnerId, MerchantProfile>,
    documents: HashMap<DocumentId, Document>,
    items: HashMap<DocumentId, Vec<LineItem>>,
}

/// Switchable failures for exercising compensation and error paths.
#[derive(Debug, Default)]
pub struct FaultInjection {
    fail_item_inserts: AtomicBool,
    fail_deletes: AtomicBool,
    fail_mark_paid: AtomicBool,
    fail_record_session: AtomicBool,
    fail_reads: AtomicBool,
    fail_overdue_writes: AtomicBool,
    forced_collisions: AtomicU32,
}

impl FaultInjection {
    pub fn fail_item_inserts(&self, on: bool) {
        self.fail_item_inserts.store(on, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, on: bool) {
        self.fail_deletes.store(on, Ordering::SeqCst);
    }

    pub fn fail_mark_paid(&self, on: bool) {
        self.fail_mark_paid.store(on, Ordering::SeqCst);
    }

    pub fn fail_record_session(&self, on: bool) {
        self.fail_record_session.store(on, Ordering::SeqCst);
    }

    /// Affects document lookups and the overdue candidate query.
    pub fn fail_reads(&self, on: bool) {
        self.fail_reads.store(on, Ordering::SeqCst);
    }

    pub fn fail_overdue_writes(&self, on: bool) {
        self.fail_overdue_writes.store(on, Ordering::SeqCst);
    }

    /// The next `n` header inserts report a number collision.
    pub fn force_number_collisions(&self, n: u32) {
        self.forced_collisions.store(n, Ordering::SeqCst);
    }

    fn take_collision(&self) -> bool {
        self.forced_collisions
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn check(flag: &AtomicBool, operation: &str) -> StoreResult<()> {
        if flag.load(Ordering::SeqCst) {
            Err(StoreError::Backend(format!("injected failure in {operation}")))
        } else {
            Ok(())
        }
    }
}

/// In-memory store for tests/dev.
///
/// Enforces the same uniqueness and conditional-write rules as the Postgres
/// adapter.
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    inner: RwLock<State>,
    faults: FaultInjection,
    paid_writes: AtomicUsize,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn faults(&self) -> &FaultInjection {
        &self.faults
    }

    pub fn upsert_counterparty(&self, counterparty: Counterparty) {
        if let Ok(mut state) = self.inner.write() {
            state.counterparties.insert(counterparty.id, counterparty);
        }
    }

    pub fn upsert_merchant_profile(&self, profile: MerchantProfile) {
        if let Ok(mut state) = self.inner.write() {
            state.profiles.insert(profile.owner_id, profile);
        }
    }

    /// Number of paid transitions actually applied.
    pub fn paid_writes(&self) -> usize {
        self.paid_writes.load(Ordering::SeqCst)
    }

    pub fn document_count(&self) -> usize {
        self.inner.read().map(|s| s.documents.len()).unwrap_or(0)
    }

    /// Overwrite a stored header as-is. Test setup only; skips every guard.
    pub fn put_document(&self, document: Document) {
        if let Ok(mut state) = self.inner.write() {
            state.documents.insert(document.id, document);
        }
    }

    fn read(&self) -> StoreResult<std::sync::RwLockReadGuard<'_, State>> {
        self.inner
            .read()
            .map_err(|_| StoreError::Backend("store lock poisoned".to_string()))
    }

    fn write(&self) -> StoreResult<std::sync::RwLockWriteGuard<'_, State>> {
        self.inner
            .write()
            .map_err(|_| StoreError::Backend("store lock poisoned".to_string()))
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn find_counterparty(&self, id: CounterpartyId) -> StoreResult<Option<Counterparty>> {
        Ok(self.read()?.counterparties.get(&id).cloned())
    }

    async fn merchant_profile(&self, owner_id: OwnerId) -> StoreResult<Option<MerchantProfile>> {
        Ok(self.read()?.profiles.get(&owner_id).cloned())
    }

    async fn insert_document(&self, document: &Document) -> StoreResult<()> {
        if self.faults.take_collision() {
            return Err(StoreError::UniqueViolation(format!(
                "documents_owner_kind_number_key: {}",
                document.number
            )));
        }

        let mut state = self.write()?;
        let clash = state.documents.values().any(|d| {
            d.owner_id == document.owner_id && d.kind == document.kind && d.number == document.number
        });
        if clash || state.documents.contains_key(&document.id) {
            return Err(StoreError::UniqueViolation(format!(
                "documents_owner_kind_number_key: {}",
                document.number
            )));
        }
        state.documents.insert(document.id, document.clone());
        Ok(())
    }

    async fn insert_line_items(&self, items: &[LineItem]) -> StoreResult<()> {
        FaultInjection::check(&self.faults.fail_item_inserts, "insert_line_items")?;

        let mut state = self.write()?;
        for item in items {
            if !state.documents.contains_key(&item.document_id) {
                return Err(StoreError::Backend(format!(
                    "line item references missing document {}",
                    item.document_id
                )));
            }
        }
        for item in items {
            state.items.entry(item.document_id).or_default().push(item.clone());
        }
        Ok(())
    }

    async fn delete_document(&self, id: DocumentId) -> StoreResult<()> {
        FaultInjection::check(&self.faults.fail_deletes, "delete_document")?;

        let mut state = self.write()?;
        state.items.remove(&id);
        state.documents.remove(&id);
        Ok(())
    }

    async fn get_document(&self, id: DocumentId) -> StoreResult<Option<Document>> {
        FaultInjection::check(&self.faults.fail_reads, "get_document")?;
        Ok(self.read()?.documents.get(&id).cloned())
    }

    async fn find_document_by_session(&self, session_id: &str) -> StoreResult<Option<Document>> {
        FaultInjection::check(&self.faults.fail_reads, "find_document_by_session")?;
        Ok(self
            .read()?
            .documents
            .values()
            .find(|d| {
                d.payment
                    .as_ref()
                    .and_then(|p| p.session_id.as_deref())
                    .is_some_and(|s| s == session_id)
            })
            .cloned())
    }

    async fn list_line_items(&self, document_id: DocumentId) -> StoreResult<Vec<LineItem>> {
        let mut items = self.read()?.items.get(&document_id).cloned().unwrap_or_default();
        items.sort_by_key(|i| i.position);
        Ok(items)
    }

    async fn record_checkout_session(
        &self,
        id: DocumentId,
        link: &CheckoutLink,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        FaultInjection::check(&self.faults.fail_record_session, "record_checkout_session")?;

        let mut state = self.write()?;
        let Some(doc) = state.documents.get_mut(&id).filter(|d| d.is_invoice()) else {
            return Ok(false);
        };
        let payment = doc.payment.get_or_insert_with(PaymentRecord::default);
        if payment.status == PaymentStatus::Paid {
            return Ok(false);
        }
        payment.account_id = Some(link.account_id.clone());
        payment.session_id = Some(link.session_id.clone());
        payment.checkout_url = Some(link.checkout_url.clone());
        payment.status = PaymentStatus::Pending;
        doc.updated_at = at;
        Ok(true)
    }

    async fn mark_paid(&self, id: DocumentId, update: &PaidUpdate) -> StoreResult<bool> {
        FaultInjection::check(&self.faults.fail_mark_paid, "mark_paid")?;

        let mut state = self.write()?;
        let Some(doc) = state.documents.get_mut(&id).filter(|d| d.is_invoice()) else {
            return Ok(false);
        };
        let payment = doc.payment.get_or_insert_with(PaymentRecord::default);
        if payment.status == PaymentStatus::Paid {
            return Ok(false);
        }
        payment.status = PaymentStatus::Paid;
        payment.paid_at = Some(update.paid_at);
        payment.payment_reference = update.payment_reference.clone();
        doc.status = DocumentStatus::Invoice(InvoiceStatus::Paid);
        doc.updated_at = update.paid_at;
        self.paid_writes.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    async fn update_status(
        &self,
        id: DocumentId,
        expected: DocumentStatus,
        next: DocumentStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut state = self.write()?;
        match state.documents.get_mut(&id) {
            Some(doc) if doc.status == expected && !doc.is_deleted() => {
                doc.status = next;
                doc.updated_at = at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_overdue_candidates(
        &self,
        owner_id: OwnerId,
        today: NaiveDate,
    ) -> StoreResult<Vec<Document>> {
        FaultInjection::check(&self.faults.fail_reads, "find_overdue_candidates")?;

        let mut found: Vec<Document> = self
            .read()?
            .documents
            .values()
            .filter(|d| d.owner_id == owner_id && d.is_overdue_on(today))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.number.cmp(&b.number));
        Ok(found)
    }

    async fn mark_overdue(
        &self,
        owner_id: OwnerId,
        ids: &[DocumentId],
        at: DateTime<Utc>,
    ) -> StoreResult<Vec<OverdueMark>> {
        FaultInjection::check(&self.faults.fail_overdue_writes, "mark_overdue")?;

        let issued = DocumentStatus::Invoice(InvoiceStatus::Issued);
        let mut state = self.write()?;
        let mut marked = Vec::new();
        for id in ids {
            if let Some(doc) = state.documents.get_mut(id) {
                if doc.owner_id == owner_id && doc.status == issued && !doc.is_deleted() {
                    doc.status = DocumentStatus::Invoice(InvoiceStatus::Overdue);
                    doc.updated_at = at;
                    marked.push(OverdueMark {
                        id: doc.id,
                        number: doc.number.clone(),
                    });
                }
            }
        }
        Ok(marked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_documents::{DocumentHeader, DocumentKind, Totals};

    fn invoice(owner: OwnerId, number: &str) -> Document {
        let header = DocumentHeader {
            kind: DocumentKind::Invoice,
            counterparty_id: CounterpartyId::new(),
            issue_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            secondary_date: NaiveDate::from_ymd_opt(2024, 3, 31),
            notes: None,
        };
        Document::draft(owner, &header, number.to_string(), Totals::zero(), Utc::now())
    }

    #[tokio::test]
    async fn duplicate_number_per_owner_and_kind_is_rejected() {
        let store = InMemoryDocumentStore::new();
        let owner = OwnerId::new();
        store.insert_document(&invoice(owner, "INV-202403-001")).await.unwrap();

        let err = store
            .insert_document(&invoice(owner, "INV-202403-001"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation(_)));

        // Other owners may reuse the number.
        store
            .insert_document(&invoice(OwnerId::new(), "INV-202403-001"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn mark_paid_is_a_check_and_set() {
        let store = InMemoryDocumentStore::new();
        let doc = invoice(OwnerId::new(), "INV-202403-002");
        store.insert_document(&doc).await.unwrap();
        let update = PaidUpdate {
            payment_reference: Some("pi_1".into()),
            paid_at: Utc::now(),
        };

        assert!(store.mark_paid(doc.id, &update).await.unwrap());
        assert!(!store.mark_paid(doc.id, &update).await.unwrap());
        assert_eq!(store.paid_writes(), 1);

        let stored = store.get_document(doc.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DocumentStatus::Invoice(InvoiceStatus::Paid));
        assert_eq!(stored.payment_status(), PaymentStatus::Paid);
    }

    #[tokio::test]
    async fn checkout_session_never_touches_a_paid_invoice() {
        let store = InMemoryDocumentStore::new();
        let doc = invoice(OwnerId::new(), "INV-202403-003");
        store.insert_document(&doc).await.unwrap();
        store
            .mark_paid(doc.id, &PaidUpdate { payment_reference: None, paid_at: Utc::now() })
            .await
            .unwrap();

        let link = CheckoutLink {
            account_id: "acct_1".into(),
            session_id: "cs_1".into(),
            checkout_url: "https://pay.example/cs_1".into(),
        };
        assert!(!store.record_checkout_session(doc.id, &link, Utc::now()).await.unwrap());
        assert_eq!(
            store.get_document(doc.id).await.unwrap().unwrap().payment_status(),
            PaymentStatus::Paid
        );
    }

    #[tokio::test]
    async fn delete_is_idempotent_and_removes_items() {
        let store = InMemoryDocumentStore::new();
        let doc = invoice(OwnerId::new(), "INV-202403-004");
        store.insert_document(&doc).await.unwrap();

        store.delete_document(doc.id).await.unwrap();
        store.delete_document(doc.id).await.unwrap();
        assert!(store.get_document(doc.id).await.unwrap().is_none());
        assert!(store.list_line_items(doc.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn forced_collisions_are_consumed_one_by_one() {
        let store = InMemoryDocumentStore::new();
        store.faults().force_number_collisions(1);
        let owner = OwnerId::new();

        assert!(store.insert_document(&invoice(owner, "INV-202403-005")).await.is_err());
        assert!(store.insert_document(&invoice(owner, "INV-202403-005")).await.is_ok());
    }
}
