use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use tally_documents::SessionPaymentStatus;

use super::{
    CheckoutSession, CheckoutSessionRequest, Expandable, PaymentIntent, PaymentProcessor, Price,
    ProcessorError, ProcessorResult, Product,
};

#[derive(Debug, Clone)]
struct StoredSession {
    account_id: String,
    session: CheckoutSession,
}

/// Scriptable processor for tests/dev.
///
/// Sessions start `unpaid`; tests move them with [`InMemoryProcessor::settle`].
#[derive(Debug, Default)]
pub struct InMemoryProcessor {
    sessions: Mutex<HashMap<String, StoredSession>>,
    prices: Mutex<HashMap<String, (i64, String)>>,
    next_id: AtomicU64,
    fail_requests: AtomicBool,
    omit_checkout_url: AtomicBool,
    retrievals: AtomicUsize,
}

impl InMemoryProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call fails with a transport error while set.
    pub fn fail_requests(&self, on: bool) {
        self.fail_requests.store(on, Ordering::SeqCst);
    }

    /// Created sessions come back without a checkout URL while set.
    pub fn omit_checkout_url(&self, on: bool) {
        self.omit_checkout_url.store(on, Ordering::SeqCst);
    }

    /// Mark a session as collected, attaching a payment intent.
    pub fn settle(&self, session_id: &str, payment_intent: &str, method: &str) -> bool {
        self.set_status(session_id, SessionPaymentStatus::Paid, Some((payment_intent, method)))
    }

    pub fn set_status(
        &self,
        session_id: &str,
        status: SessionPaymentStatus,
        intent: Option<(&str, &str)>,
    ) -> bool {
        let Ok(mut sessions) = self.sessions.lock() else {
            return false;
        };
        let Some(stored) = sessions.get_mut(session_id) else {
            return false;
        };
        stored.session.payment_status = status;
        if let Some((id, method)) = intent {
            stored.session.payment_intent = Some(Expandable::Object(Box::new(PaymentIntent {
                id: id.to_string(),
                payment_method_types: vec![method.to_string()],
            })));
        }
        true
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn session(&self, session_id: &str) -> Option<CheckoutSession> {
        self.sessions
            .lock()
            .ok()?
            .get(session_id)
            .map(|s| s.session.clone())
    }

    pub fn retrievals(&self) -> usize {
        self.retrievals.load(Ordering::SeqCst)
    }

    fn guard(&self) -> ProcessorResult<()> {
        if self.fail_requests.load(Ordering::SeqCst) {
            return Err(ProcessorError::Transport("injected processor outage".to_string()));
        }
        Ok(())
    }

    fn mint(&self, prefix: &str) -> String {
        format!("{prefix}_{:06}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn poisoned() -> ProcessorError {
        ProcessorError::Transport("processor state poisoned".to_string())
    }
}

#[async_trait]
impl PaymentProcessor for InMemoryProcessor {
    async fn create_product(&self, _account_id: &str, _name: &str) -> ProcessorResult<Product> {
        self.guard()?;
        Ok(Product { id: self.mint("prod") })
    }

    async fn create_price(
        &self,
        _account_id: &str,
        _product_id: &str,
        unit_amount: i64,
        currency: &str,
    ) -> ProcessorResult<Price> {
        self.guard()?;
        let id = self.mint("price");
        self.prices
            .lock()
            .map_err(|_| Self::poisoned())?
            .insert(id.clone(), (unit_amount, currency.to_ascii_lowercase()));
        Ok(Price { id })
    }

    async fn create_checkout_session(
        &self,
        account_id: &str,
        request: &CheckoutSessionRequest,
    ) -> ProcessorResult<CheckoutSession> {
        self.guard()?;
        let (amount, currency) = self
            .prices
            .lock()
            .map_err(|_| Self::poisoned())?
            .get(&request.price_id)
            .cloned()
            .ok_or_else(|| ProcessorError::Api {
                status: 400,
                code: "resource_missing".to_string(),
                message: format!("No such price: {}", request.price_id),
            })?;

        let id = self.mint("cs_test");
        let url = (!self.omit_checkout_url.load(Ordering::SeqCst))
            .then(|| format!("https://checkout.test/pay/{id}"));
        let session = CheckoutSession {
            id: id.clone(),
            url,
            payment_status: SessionPaymentStatus::Unpaid,
            payment_intent: None,
            payment_method_types: vec!["card".to_string()],
            amount_total: Some(amount * i64::from(request.quantity)),
            currency: Some(currency),
            metadata: request.metadata.clone(),
        };
        self.sessions.lock().map_err(|_| Self::poisoned())?.insert(
            id,
            StoredSession {
                account_id: account_id.to_string(),
                session: session.clone(),
            },
        );
        Ok(session)
    }

    async fn retrieve_checkout_session(
        &self,
        account_id: &str,
        session_id: &str,
    ) -> ProcessorResult<CheckoutSession> {
        self.guard()?;
        self.retrievals.fetch_add(1, Ordering::SeqCst);
        let sessions = self.sessions.lock().map_err(|_| Self::poisoned())?;
        match sessions.get(session_id) {
            Some(stored) if stored.account_id == account_id => Ok(stored.session.clone()),
            _ => Err(ProcessorError::Api {
                status: 404,
                code: "resource_missing".to_string(),
                message: format!("No such checkout.session: {session_id}"),
            }),
        }
    }
}
