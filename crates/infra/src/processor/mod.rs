//! External payment processor (connected-account checkout API).
//!
//! Every call is scoped to the merchant's connected sub-account, passed per call.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

use tally_documents::SessionPaymentStatus;

pub mod in_memory;
pub mod stripe;
pub mod webhook;

pub use in_memory::InMemoryProcessor;
pub use stripe::StripeClient;

pub type ProcessorResult<T> = Result<T, ProcessorError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProcessorError {
    /// The request never produced a response (DNS, TLS, timeout, ...).
    #[error("processor transport error: {0}")]
    Transport(String),

    /// The processor answered with a non-success status.
    #[error("processor rejected request ({status}): {code}: {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    #[error("could not decode processor response: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Product {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Price {
    pub id: String,
}

/// A field the processor returns either as a bare id or, when expanded, as
/// the full object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Expandable<T> {
    Id(String),
    Object(Box<T>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    #[serde(default)]
    pub payment_method_types: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: Option<String>,
    pub payment_status: SessionPaymentStatus,
    #[serde(default)]
    pub payment_intent: Option<Expandable<PaymentIntent>>,
    #[serde(default)]
    pub payment_method_types: Vec<String>,
    #[serde(default)]
    pub amount_total: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl CheckoutSession {
    /// Processor-assigned payment reference (payment intent id), expanded or not.
    pub fn payment_reference(&self) -> Option<&str> {
        self.payment_intent.as_ref().map(|pi| match pi {
            Expandable::Id(id) => id.as_str(),
            Expandable::Object(intent) => intent.id.as_str(),
        })
    }

    pub fn payment_method(&self) -> Option<&str> {
        let from_intent = match &self.payment_intent {
            Some(Expandable::Object(intent)) => intent.payment_method_types.first(),
            _ => None,
        };
        from_intent
            .or_else(|| self.payment_method_types.first())
            .map(String::as_str)
    }
}

/// Parameters of a one-line checkout session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSessionRequest {
    pub price_id: String,
    pub quantity: u32,
    pub success_url: String,
    pub cancel_url: String,
    pub customer_email: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    /// Register a sellable unit.
    async fn create_product(&self, account_id: &str, name: &str) -> ProcessorResult<Product>;

    async fn create_price(
        &self,
        account_id: &str,
        product_id: &str,
        unit_amount: i64,
        currency: &str,
    ) -> ProcessorResult<Price>;

    async fn create_checkout_session(
        &self,
        account_id: &str,
        request: &CheckoutSessionRequest,
    ) -> ProcessorResult<CheckoutSession>;

    /// Fetch live session state, with the payment intent expanded.
    async fn retrieve_checkout_session(
        &self,
        account_id: &str,
        session_id: &str,
    ) -> ProcessorResult<CheckoutSession>;
}

#[async_trait]
impl<P> PaymentProcessor for Arc<P>
where
    P: PaymentProcessor + ?Sized,
{
    async fn create_product(&self, account_id: &str, name: &str) -> ProcessorResult<Product> {
        (**self).create_product(account_id, name).await
    }

    async fn create_price(
        &self,
        account_id: &str,
        product_id: &str,
        unit_amount: i64,
        currency: &str,
    ) -> ProcessorResult<Price> {
        (**self)
            .create_price(account_id, product_id, unit_amount, currency)
            .await
    }

    async fn create_checkout_session(
        &self,
        account_id: &str,
        request: &CheckoutSessionRequest,
    ) -> ProcessorResult<CheckoutSession> {
        (**self).create_checkout_session(account_id, request).await
    }

    async fn retrieve_checkout_session(
        &self,
        account_id: &str,
        session_id: &str,
    ) -> ProcessorResult<CheckoutSession> {
        (**self).retrieve_checkout_session(account_id, session_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_decodes_collapsed_and_expanded_payment_intent() {
        let collapsed: CheckoutSession = serde_json::from_value(serde_json::json!({
            "id": "cs_1",
            "url": null,
            "payment_status": "paid",
            "payment_intent": "pi_1",
            "payment_method_types": ["card"]
        }))
        .unwrap();
        assert_eq!(collapsed.payment_reference(), Some("pi_1"));
        assert_eq!(collapsed.payment_method(), Some("card"));

        let expanded: CheckoutSession = serde_json::from_value(serde_json::json!({
            "id": "cs_2",
            "url": "https://checkout.example/cs_2",
            "payment_status": "no_payment_required",
            "payment_intent": { "id": "pi_2", "payment_method_types": ["sepa_debit"] },
            "metadata": { "invoice_id": "abc" }
        }))
        .unwrap();
        assert_eq!(expanded.payment_reference(), Some("pi_2"));
        assert_eq!(expanded.payment_method(), Some("sepa_debit"));
        assert_eq!(expanded.payment_status, SessionPaymentStatus::NoPaymentRequired);
        assert_eq!(expanded.metadata.get("invoice_id").map(String::as_str), Some("abc"));
    }
}
