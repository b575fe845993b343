use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::instrument;

use tally_core::{DocumentId, OwnerId};

use super::DocumentServices;
use crate::error::{ServiceError, ServiceResult};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub count: usize,
    pub numbers: Vec<String>,
}

impl DocumentServices {
    /// Move the owner's issued invoices that are past due to `overdue`.
    pub async fn sweep_overdue(&self, owner_id: OwnerId) -> ServiceResult<SweepReport> {
        self.sweep_overdue_at(owner_id, Utc::now()).await
    }

    /// A due date strictly before the calendar day of `now` counts as past due.
    #[instrument(skip(self), fields(owner_id = %owner_id, today = %now.date_naive()), err)]
    pub async fn sweep_overdue_at(
        &self,
        owner_id: OwnerId,
        now: DateTime<Utc>,
    ) -> ServiceResult<SweepReport> {
        let today = now.date_naive();
        let candidates = self
            .store
            .find_overdue_candidates(owner_id, today)
            .await
            .map_err(|e| ServiceError::upstream("find_overdue_candidates", e))?;
        if candidates.is_empty() {
            return Ok(SweepReport::default());
        }

        let ids: Vec<DocumentId> = candidates.iter().map(|d| d.id).collect();
        let marked = self
            .store
            .mark_overdue(owner_id, &ids, now)
            .await
            .map_err(|e| ServiceError::upstream("mark_overdue", e))?;

        let numbers: Vec<String> = marked.into_iter().map(|m| m.number).collect();
        tracing::info!(candidates = ids.len(), updated = numbers.len(), "overdue sweep finished");
        Ok(SweepReport {
            count: numbers.len(),
            numbers,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use crate::error::ServiceError;
    use crate::saga::NewDocument;
    use crate::services::test_support::{Harness, harness};
    use tally_documents::{Document, DocumentKind, DocumentStatus, InvoiceStatus};

    async fn issued_invoice_due(h: &Harness, due_offset_days: i64) -> Document {
        let today = Utc::now().date_naive();
        let mut header = h.header(DocumentKind::Invoice);
        header.issue_date = today - Duration::days(60);
        header.secondary_date = Some(today + Duration::days(due_offset_days));
        let created = h
            .services
            .create_document(h.owner, NewDocument::computed(header, h.items()))
            .await
            .unwrap();
        h.services
            .transition_status(h.owner, created.document.id, DocumentStatus::Invoice(InvoiceStatus::Issued))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn only_issued_invoices_past_due_are_swept() {
        let h = harness();
        let yesterday = issued_invoice_due(&h, -1).await;
        let tomorrow = issued_invoice_due(&h, 1).await;
        let due_today = issued_invoice_due(&h, 0).await;

        let paid = issued_invoice_due(&h, -10).await;
        h.force_status(&paid, DocumentStatus::Invoice(InvoiceStatus::Paid));

        let report = h.services.sweep_overdue(h.owner).await.unwrap();
        assert_eq!(report.count, 1);
        assert_eq!(report.numbers, vec![yesterday.number.clone()]);

        for (doc, expected) in [
            (&yesterday, InvoiceStatus::Overdue),
            (&tomorrow, InvoiceStatus::Issued),
            (&due_today, InvoiceStatus::Issued),
            (&paid, InvoiceStatus::Paid),
        ] {
            let (stored, _) = h.services.get_document(h.owner, doc.id).await.unwrap();
            assert_eq!(stored.status, DocumentStatus::Invoice(expected), "{}", doc.number);
        }
    }

    #[tokio::test]
    async fn second_sweep_finds_nothing() {
        let h = harness();
        issued_invoice_due(&h, -3).await;
        assert_eq!(h.services.sweep_overdue(h.owner).await.unwrap().count, 1);
        assert_eq!(h.services.sweep_overdue(h.owner).await.unwrap().count, 0);
    }

    #[tokio::test]
    async fn sweep_is_scoped_to_the_caller() {
        let h = harness();
        issued_invoice_due(&h, -3).await;
        let report = h.services.sweep_overdue(tally_core::OwnerId::new()).await.unwrap();
        assert_eq!(report.count, 0);
    }

    #[tokio::test]
    async fn sweep_at_a_fixed_instant_uses_its_calendar_day() {
        let h = harness();
        let invoice = issued_invoice_due(&h, 0).await;
        let due = invoice.secondary_date.unwrap();
        let next_morning = Utc
            .from_utc_datetime(&(due + Duration::days(1)).and_hms_opt(0, 0, 1).unwrap());

        let report = h.services.sweep_overdue_at(h.owner, next_morning).await.unwrap();
        assert_eq!(report.numbers, vec![invoice.number]);
    }

    #[tokio::test]
    async fn read_failure_aborts_before_any_write() {
        let h = harness();
        let invoice = issued_invoice_due(&h, -3).await;
        h.store.faults().fail_reads(true);

        let err = h.services.sweep_overdue(h.owner).await.unwrap_err();
        assert!(matches!(err, ServiceError::Upstream { operation: "find_overdue_candidates", .. }));

        h.store.faults().fail_reads(false);
        let (stored, _) = h.services.get_document(h.owner, invoice.id).await.unwrap();
        assert_eq!(stored.status, DocumentStatus::Invoice(InvoiceStatus::Issued));
    }

    #[tokio::test]
    async fn write_failure_is_reported_distinctly() {
        let h = harness();
        issued_invoice_due(&h, -3).await;
        h.store.faults().fail_overdue_writes(true);

        let err = h.services.sweep_overdue(h.owner).await.unwrap_err();
        assert!(matches!(err, ServiceError::Upstream { operation: "mark_overdue", .. }));
    }
}
