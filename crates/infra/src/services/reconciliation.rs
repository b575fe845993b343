//! Payment reconciliation.
//!
//! Two triggers converge on one guarded write:
//!
//! - pull: a caller names an invoice ([`DocumentServices::verify_payment_for_document`]);
//! - push: a checkout session id arrives from the processor or from the
//!   payer's browser returning ([`DocumentServices::verify_payment_for_session`]).
//!
//! Either may arrive first, both may arrive together, the push may never come.
//! Correctness rests on [`decide_payment`] plus the store's conditional
//! `mark_paid`; whichever trigger loses the race observes `AlreadyPaid`.

use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use tracing::instrument;

use tally_core::{DocumentId, OwnerId};
use tally_documents::{Document, PaymentDecision, SessionPaymentStatus, decide_payment};

use super::DocumentServices;
use crate::error::{ServiceError, ServiceResult};
use crate::notify::{Notification, NotificationKind, dispatch_best_effort};
use crate::processor::CheckoutSession;
use crate::store::PaidUpdate;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// This call applied the paid transition.
    Paid {
        document_id: DocumentId,
        number: String,
        payment_reference: Option<String>,
    },
    /// Already settled locally; nothing written.
    AlreadyPaid { document_id: DocumentId, number: String },
    /// The processor has not collected the money yet.
    Pending {
        document_id: DocumentId,
        processor_status: SessionPaymentStatus,
    },
    /// The invoice has no checkout session to check.
    NotApplicable { reason: String },
    /// The invoice carries a session but no merchant account to query it under.
    MissingAccountInfo { document_id: DocumentId },
    /// No live invoice carries this session (yet).
    NotFound { session_id: String },
}

impl DocumentServices {
    /// Pull path.
    #[instrument(skip(self), fields(owner_id = %owner_id, document_id = %id), err)]
    pub async fn verify_payment_for_document(
        &self,
        owner_id: OwnerId,
        id: DocumentId,
    ) -> ServiceResult<ReconcileOutcome> {
        let invoice = self.load_owned(owner_id, id, "verify_payment").await?;
        if !invoice.is_invoice() {
            return Ok(ReconcileOutcome::NotApplicable {
                reason: format!("{} is a {}, not an invoice", invoice.number, invoice.kind),
            });
        }

        let payment = invoice.payment.as_ref();
        let Some(session_id) = payment.and_then(|p| p.session_id.clone()) else {
            return Ok(ReconcileOutcome::NotApplicable {
                reason: format!("invoice {} has no checkout session", invoice.number),
            });
        };
        let Some(account_id) = payment
            .and_then(|p| p.account_id.clone())
            .filter(|a| !a.is_empty())
        else {
            return Ok(ReconcileOutcome::NotApplicable {
                reason: format!("invoice {} has no merchant account reference", invoice.number),
            });
        };

        self.reconcile(&invoice, &account_id, &session_id).await
    }

    /// Push path. `owner_id` is `None` for processor notifications, which are
    /// authenticated by signature instead of by caller.
    #[instrument(skip(self), fields(owner_id = ?owner_id.map(|o| o.to_string()), session_id = %session_id), err)]
    pub async fn verify_payment_for_session(
        &self,
        owner_id: Option<OwnerId>,
        session_id: &str,
    ) -> ServiceResult<ReconcileOutcome> {
        let invoice = self
            .store
            .find_document_by_session(session_id)
            .await
            .map_err(|e| ServiceError::upstream("find_document_by_session", e))?;

        let visible = invoice.filter(|doc| {
            doc.is_invoice() && !doc.is_deleted() && owner_id.is_none_or(|owner| doc.owner_id == owner)
        });
        let Some(invoice) = visible else {
            tracing::debug!("no invoice carries this session yet");
            return Ok(ReconcileOutcome::NotFound {
                session_id: session_id.to_string(),
            });
        };

        let account_id = invoice
            .payment
            .as_ref()
            .and_then(|p| p.account_id.clone())
            .filter(|a| !a.is_empty());
        let Some(account_id) = account_id else {
            return Ok(ReconcileOutcome::MissingAccountInfo {
                document_id: invoice.id,
            });
        };

        self.reconcile(&invoice, &account_id, session_id).await
    }

    async fn reconcile(
        &self,
        invoice: &Document,
        account_id: &str,
        session_id: &str,
    ) -> ServiceResult<ReconcileOutcome> {
        let session = self
            .processor
            .retrieve_checkout_session(account_id, session_id)
            .await
            .map_err(|e| ServiceError::upstream("retrieve_checkout_session", e))?;

        match decide_payment(session.payment_status, invoice.payment_status()) {
            PaymentDecision::AlreadyPaid => Ok(ReconcileOutcome::AlreadyPaid {
                document_id: invoice.id,
                number: invoice.number.clone(),
            }),
            PaymentDecision::AwaitingPayment(processor_status) => {
                tracing::debug!(status = processor_status.as_str(), "payment not collected yet");
                Ok(ReconcileOutcome::Pending {
                    document_id: invoice.id,
                    processor_status,
                })
            }
            PaymentDecision::MarkPaid => self.apply_paid(invoice, &session).await,
        }
    }

    async fn apply_paid(
        &self,
        invoice: &Document,
        session: &CheckoutSession,
    ) -> ServiceResult<ReconcileOutcome> {
        let update = PaidUpdate {
            payment_reference: session.payment_reference().map(str::to_string),
            paid_at: Utc::now(),
        };

        let applied = match self.store.mark_paid(invoice.id, &update).await {
            Ok(applied) => applied,
            Err(e) => {
                return Err(ServiceError::inconsistency(
                    "reconcile_payment",
                    Some(invoice.id),
                    format!(
                        "processor reports session {} paid but the invoice could not be updated: {e}",
                        session.id
                    ),
                    "payment received; retry verification or mark the invoice paid manually",
                ));
            }
        };
        if !applied {
            // A concurrent trigger won the guarded write.
            return Ok(ReconcileOutcome::AlreadyPaid {
                document_id: invoice.id,
                number: invoice.number.clone(),
            });
        }

        tracing::info!(
            document_id = %invoice.id,
            number = %invoice.number,
            payment_reference = ?update.payment_reference,
            "invoice marked paid"
        );

        let currency = self
            .store
            .merchant_profile(invoice.owner_id)
            .await
            .ok()
            .flatten()
            .map(|p| p.currency)
            .or_else(|| session.currency.clone());
        dispatch_best_effort(
            self.notifier.as_ref(),
            payment_received(invoice, session, currency),
        )
        .await;

        Ok(ReconcileOutcome::Paid {
            document_id: invoice.id,
            number: invoice.number.clone(),
            payment_reference: update.payment_reference,
        })
    }
}

fn payment_received(
    invoice: &Document,
    session: &CheckoutSession,
    currency: Option<String>,
) -> Notification {
    let mut metadata = Map::new();
    metadata.insert("document_id".into(), JsonValue::String(invoice.id.to_string()));
    metadata.insert("document_number".into(), JsonValue::String(invoice.number.clone()));
    metadata.insert("amount".into(), JsonValue::String(invoice.totals.total.to_string()));
    metadata.insert(
        "currency".into(),
        currency.map(JsonValue::String).unwrap_or(JsonValue::Null),
    );
    metadata.insert(
        "payment_method".into(),
        session
            .payment_method()
            .map(|m| JsonValue::String(m.to_string()))
            .unwrap_or(JsonValue::Null),
    );
    Notification {
        kind: NotificationKind::PaymentReceived,
        recipient: invoice.owner_id,
        metadata,
    }
}
