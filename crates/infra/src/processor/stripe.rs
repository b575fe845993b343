//! Stripe-style REST client for connected-account checkout.
//!
//! Requests are form encoded, authenticated with the platform secret key and
//! scoped to the merchant via the `Stripe-Account` header.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::instrument;

use crate::config::PaymentSettings;

use super::{
    CheckoutSession, CheckoutSessionRequest, PaymentProcessor, Price, ProcessorError,
    ProcessorResult, Product,
};

const ACCOUNT_HEADER: &str = "Stripe-Account";

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    code: Option<String>,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Clone)]
pub struct StripeClient {
    http: Client,
    api_base: String,
    secret_key: SecretString,
}

impl std::fmt::Debug for StripeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeClient")
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

impl StripeClient {
    /// Build a client with the configured timeout. Fails only if the TLS
    /// backend cannot be initialised.
    pub fn new(settings: &PaymentSettings, secret_key: SecretString) -> ProcessorResult<Self> {
        let http = Client::builder()
            .use_rustls_tls()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| ProcessorError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            api_base: settings.api_base.trim_end_matches('/').to_string(),
            secret_key,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path.trim_start_matches('/'))
    }

    fn authorized(&self, builder: RequestBuilder, account_id: &str) -> RequestBuilder {
        builder
            .bearer_auth(self.secret_key.expose_secret())
            .header(ACCOUNT_HEADER, account_id)
    }

    async fn post_form<T: DeserializeOwned>(
        &self,
        path: &str,
        account_id: &str,
        form: &[(String, String)],
    ) -> ProcessorResult<T> {
        let request = self.authorized(self.http.post(self.url(path)), account_id).form(form);
        self.send(request, path).await
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder, path: &str) -> ProcessorResult<T> {
        let response = request
            .send()
            .await
            .map_err(|e| ProcessorError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ProcessorError::Transport(e.to_string()))?;

        if status.is_success() {
            return serde_json::from_str(&body).map_err(|e| ProcessorError::Decode(e.to_string()));
        }

        let (code, message) = match serde_json::from_str::<ApiErrorBody>(&body) {
            Ok(parsed) => (
                parsed
                    .error
                    .code
                    .or(parsed.error.kind)
                    .unwrap_or_else(|| "unknown".to_string()),
                parsed.error.message.unwrap_or_default(),
            ),
            Err(_) => ("unknown".to_string(), body),
        };
        tracing::warn!(path, status = status.as_u16(), code = %code, "processor request failed");
        Err(ProcessorError::Api {
            status: status.as_u16(),
            code,
            message,
        })
    }
}

#[async_trait]
impl PaymentProcessor for StripeClient {
    #[instrument(skip(self), err)]
    async fn create_product(&self, account_id: &str, name: &str) -> ProcessorResult<Product> {
        let form = vec![("name".to_string(), name.to_string())];
        self.post_form("products", account_id, &form).await
    }

    #[instrument(skip(self), err)]
    async fn create_price(
        &self,
        account_id: &str,
        product_id: &str,
        unit_amount: i64,
        currency: &str,
    ) -> ProcessorResult<Price> {
        let form = vec![
            ("product".to_string(), product_id.to_string()),
            ("unit_amount".to_string(), unit_amount.to_string()),
            ("currency".to_string(), currency.to_ascii_lowercase()),
        ];
        self.post_form("prices", account_id, &form).await
    }

    #[instrument(skip(self, request), fields(price_id = %request.price_id), err)]
    async fn create_checkout_session(
        &self,
        account_id: &str,
        request: &CheckoutSessionRequest,
    ) -> ProcessorResult<CheckoutSession> {
        let mut form = vec![
            ("mode".to_string(), "payment".to_string()),
            ("line_items[0][price]".to_string(), request.price_id.clone()),
            ("line_items[0][quantity]".to_string(), request.quantity.to_string()),
            ("success_url".to_string(), request.success_url.clone()),
            ("cancel_url".to_string(), request.cancel_url.clone()),
        ];
        if let Some(email) = &request.customer_email {
            form.push(("customer_email".to_string(), email.clone()));
        }
        for (key, value) in &request.metadata {
            form.push((format!("metadata[{key}]"), value.clone()));
        }
        self.post_form("checkout/sessions", account_id, &form).await
    }

    #[instrument(skip(self), err)]
    async fn retrieve_checkout_session(
        &self,
        account_id: &str,
        session_id: &str,
    ) -> ProcessorResult<CheckoutSession> {
        let path = format!("checkout/sessions/{session_id}");
        let request = self
            .authorized(self.http.get(self.url(&path)), account_id)
            .query(&[("expand[]", "payment_intent")]);
        self.send(request, &path).await
    }
}
