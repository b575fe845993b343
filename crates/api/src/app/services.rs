//! Service wiring: picks the store and processor adapters from configuration.

use std::sync::Arc;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use sqlx::postgres::PgPoolOptions;

use tally_infra::config::AppConfig;
use tally_infra::notify::{NotificationSink, TracingNotificationSink};
use tally_infra::processor::{InMemoryProcessor, PaymentProcessor, StripeClient};
use tally_infra::store::{DocumentStore, InMemoryDocumentStore, PostgresDocumentStore};
use tally_infra::DocumentServices;

/// Verification settings for inbound processor notifications.
#[derive(Debug, Clone)]
pub struct WebhookSettings {
    /// Absent: the webhook endpoint refuses every delivery.
    pub secret: Option<SecretString>,
    pub tolerance_secs: i64,
}

/// Everything the handlers need, shared behind one `Arc`.
#[derive(Clone)]
pub struct AppServices {
    pub documents: DocumentServices,
    pub webhook: WebhookSettings,
    /// Wait before a caller-triggered payment verification.
    pub verify_precheck_delay: Duration,
}

impl AppServices {
    pub fn new(
        config: &AppConfig,
        store: Arc<dyn DocumentStore>,
        processor: Arc<dyn PaymentProcessor>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            documents: DocumentServices::new(store, processor, notifier, config.services.clone()),
            webhook: WebhookSettings {
                secret: config.payment.webhook_secret.clone(),
                tolerance_secs: config.payment.webhook_tolerance_secs,
            },
            verify_precheck_delay: config.services.verify_precheck_delay,
        }
    }
}

/// Build services for the running process.
///
/// Without `DATABASE_URL` the in-memory store is used; without a processor
/// secret key the in-memory processor is used. Both are for local development.
pub async fn build_services(config: &AppConfig) -> anyhow::Result<AppServices> {
    let store: Arc<dyn DocumentStore> = match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(url.expose_secret())
                .await?;
            let store = PostgresDocumentStore::new(pool);
            store.ensure_schema().await?;
            tracing::info!("using postgres document store");
            Arc::new(store)
        }
        None => {
            tracing::warn!("DATABASE_URL not set; documents are kept in memory");
            Arc::new(InMemoryDocumentStore::new())
        }
    };

    let processor: Arc<dyn PaymentProcessor> = match &config.payment.secret_key {
        Some(key) => Arc::new(StripeClient::new(&config.payment, key.clone())?),
        None => {
            tracing::warn!("PAYMENT_SECRET_KEY not set; using the in-memory payment processor");
            Arc::new(InMemoryProcessor::new())
        }
    };

    Ok(AppServices::new(
        config,
        store,
        processor,
        Arc::new(TracingNotificationSink),
    ))
}
