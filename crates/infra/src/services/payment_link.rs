use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::instrument;

use tally_core::{DocumentId, OwnerId};
use tally_documents::{PaymentStatus, to_minor_units};

use super::DocumentServices;
use crate::config::PaymentLinkPolicy;
use crate::error::{ServiceError, ServiceResult, UpstreamError};
use crate::processor::CheckoutSessionRequest;
use crate::store::CheckoutLink;

/// Result of a payment-link request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentLink {
    pub checkout_url: String,
    pub session_id: String,
    /// An existing pending session was handed back instead of a new one.
    pub reused: bool,
    /// `false` when the session exists at the processor but its details could
    /// not be stored on the invoice.
    pub persisted: bool,
}

impl DocumentServices {
    /// Provision a hosted checkout page for an invoice under the owner's
    /// connected merchant account.
    #[instrument(skip(self), fields(owner_id = %owner_id, invoice_id = %invoice_id), err)]
    pub async fn create_payment_link(
        &self,
        owner_id: OwnerId,
        invoice_id: DocumentId,
    ) -> ServiceResult<PaymentLink> {
        let invoice = self.load_owned(owner_id, invoice_id, "create_payment_link").await?;
        if !invoice.is_invoice() {
            return Err(ServiceError::validation(format!(
                "payment links exist for invoices only, {} is a {}",
                invoice.number, invoice.kind
            )));
        }
        if invoice.payment_status() == PaymentStatus::Paid {
            return Err(ServiceError::validation(format!(
                "invoice {} is already paid",
                invoice.number
            )));
        }

        if self.settings.link_policy == PaymentLinkPolicy::ReuseIfPending {
            if let Some(existing) = invoice.payment.as_ref().filter(|p| p.status == PaymentStatus::Pending) {
                if let (Some(url), Some(session_id)) = (&existing.checkout_url, &existing.session_id) {
                    tracing::debug!(session_id = %session_id, "reusing pending checkout session");
                    return Ok(PaymentLink {
                        checkout_url: url.clone(),
                        session_id: session_id.clone(),
                        reused: true,
                        persisted: true,
                    });
                }
            }
        }

        let profile = self
            .store
            .merchant_profile(owner_id)
            .await
            .map_err(|e| ServiceError::upstream("merchant_profile", e))?
            .ok_or_else(|| ServiceError::validation("no billing profile on file for this account"))?;
        let account_id = profile.charge_capable_account()?.to_string();
        let unit_amount = to_minor_units(invoice.totals.total, &profile.currency)?;

        let product = self
            .processor
            .create_product(&account_id, &format!("Invoice {}", invoice.number))
            .await
            .map_err(|e| ServiceError::upstream("create_product", e))?;
        let price = self
            .processor
            .create_price(&account_id, &product.id, unit_amount, &profile.currency)
            .await
            .map_err(|e| ServiceError::upstream("create_price", e))?;

        let base = self.settings.app_base_url.trim_end_matches('/');
        let mut metadata = BTreeMap::new();
        metadata.insert("invoice_id".to_string(), invoice.id.to_string());
        metadata.insert("invoice_number".to_string(), invoice.number.clone());
        metadata.insert("owner_id".to_string(), owner_id.to_string());

        let counterparty_email = self
            .store
            .find_counterparty(invoice.counterparty_id)
            .await
            .ok()
            .flatten()
            .and_then(|c| c.email);

        let request = CheckoutSessionRequest {
            price_id: price.id,
            quantity: 1,
            success_url: format!("{base}/invoices/{}?payment=success", invoice.id),
            cancel_url: format!("{base}/invoices/{}?payment=cancelled", invoice.id),
            customer_email: counterparty_email,
            metadata,
        };
        let session = self
            .processor
            .create_checkout_session(&account_id, &request)
            .await
            .map_err(|e| ServiceError::upstream("create_checkout_session", e))?;

        let Some(checkout_url) = session.url.clone() else {
            return Err(ServiceError::upstream(
                "create_checkout_session",
                UpstreamError::MissingCheckoutUrl {
                    session_id: session.id,
                },
            ));
        };

        let link = CheckoutLink {
            account_id,
            session_id: session.id.clone(),
            checkout_url: checkout_url.clone(),
        };
        let persisted = match self.store.record_checkout_session(invoice.id, &link, Utc::now()).await {
            Ok(true) => true,
            Ok(false) => {
                tracing::warn!(
                    session_id = %session.id,
                    number = %invoice.number,
                    "invoice was paid while the link was created; session details not stored"
                );
                false
            }
            Err(e) => {
                tracing::warn!(
                    session_id = %session.id,
                    number = %invoice.number,
                    error = %e,
                    "checkout session created but not recorded on the invoice"
                );
                false
            }
        };

        tracing::info!(session_id = %session.id, number = %invoice.number, amount = unit_amount, "payment link created");
        Ok(PaymentLink {
            checkout_url,
            session_id: session.id,
            reused: false,
            persisted,
        })
    }
}

#[cfg(test)]
mod tests {
    use tally_documents::{DocumentKind, MerchantProfile, PaymentStatus};

    use crate::config::{PaymentLinkPolicy, ServiceSettings};
    use crate::error::{ServiceError, UpstreamError};
    use crate::services::test_support::{harness, harness_with};

    #[tokio::test]
    async fn link_is_created_under_the_connected_account_and_recorded() {
        let h = harness();
        let invoice = h.create(DocumentKind::Invoice).await;

        let link = h.services.create_payment_link(h.owner, invoice.id).await.unwrap();
        assert!(link.persisted);
        assert!(!link.reused);
        assert!(link.checkout_url.contains(&link.session_id));

        let session = h.processor.session(&link.session_id).unwrap();
        assert_eq!(session.amount_total, Some(21620));
        assert_eq!(session.currency.as_deref(), Some("eur"));
        assert_eq!(session.metadata.get("invoice_number"), Some(&invoice.number));
        assert_eq!(session.metadata.get("invoice_id"), Some(&invoice.id.to_string()));

        let (stored, _) = h.services.get_document(h.owner, invoice.id).await.unwrap();
        let payment = stored.payment.unwrap();
        assert_eq!(payment.status, PaymentStatus::Pending);
        assert_eq!(payment.session_id.as_deref(), Some(link.session_id.as_str()));
        assert_eq!(payment.account_id.as_deref(), Some("acct_owner"));
    }

    #[tokio::test]
    async fn each_request_mints_a_new_session_by_default() {
        let h = harness();
        let invoice = h.create(DocumentKind::Invoice).await;
        let first = h.services.create_payment_link(h.owner, invoice.id).await.unwrap();
        let second = h.services.create_payment_link(h.owner, invoice.id).await.unwrap();
        assert_ne!(first.session_id, second.session_id);
        assert_eq!(h.processor.session_count(), 2);
    }

    #[tokio::test]
    async fn reuse_policy_hands_back_the_pending_session() {
        let h = harness_with(ServiceSettings {
            link_policy: PaymentLinkPolicy::ReuseIfPending,
            ..ServiceSettings::default()
        });
        let invoice = h.create(DocumentKind::Invoice).await;
        let first = h.services.create_payment_link(h.owner, invoice.id).await.unwrap();
        let second = h.services.create_payment_link(h.owner, invoice.id).await.unwrap();
        assert!(second.reused);
        assert_eq!(first.checkout_url, second.checkout_url);
        assert_eq!(h.processor.session_count(), 1);
    }

    #[tokio::test]
    async fn merchant_without_connected_account_is_rejected_before_any_processor_call() {
        let h = harness();
        h.store.upsert_merchant_profile(MerchantProfile {
            owner_id: h.owner,
            currency: "eur".into(),
            connected_account_id: None,
            charges_enabled: false,
            notification_email: None,
        });
        let invoice = h.create(DocumentKind::Invoice).await;

        let err = h.services.create_payment_link(h.owner, invoice.id).await.unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
        assert_eq!(h.processor.session_count(), 0);
    }

    #[tokio::test]
    async fn quotes_cannot_get_payment_links() {
        let h = harness();
        let quote = h.create(DocumentKind::Quote).await;
        let err = h.services.create_payment_link(h.owner, quote.id).await.unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }

    #[tokio::test]
    async fn missing_checkout_url_is_an_upstream_error() {
        let h = harness();
        h.processor.omit_checkout_url(true);
        let invoice = h.create(DocumentKind::Invoice).await;

        let err = h.services.create_payment_link(h.owner, invoice.id).await.unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Upstream { source: UpstreamError::MissingCheckoutUrl { .. }, .. }
        ));
        let (stored, _) = h.services.get_document(h.owner, invoice.id).await.unwrap();
        assert_eq!(stored.payment_status(), PaymentStatus::Unset);
    }

    #[tokio::test]
    async fn failed_recording_still_returns_the_url() {
        let h = harness();
        h.store.faults().fail_record_session(true);
        let invoice = h.create(DocumentKind::Invoice).await;

        let link = h.services.create_payment_link(h.owner, invoice.id).await.unwrap();
        assert!(!link.persisted);
        assert!(!link.checkout_url.is_empty());
    }

    #[tokio::test]
    async fn processor_outage_surfaces_as_upstream() {
        let h = harness();
        h.processor.fail_requests(true);
        let invoice = h.create(DocumentKind::Invoice).await;

        let err = h.services.create_payment_link(h.owner, invoice.id).await.unwrap_err();
        assert_eq!(err.code(), "processor_error");
    }
}
