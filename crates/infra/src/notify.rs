//! Notification sink (produced-to, fire-and-forget).

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

use tally_core::OwnerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    PaymentReceived,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub recipient: OwnerId,
    pub metadata: Map<String, JsonValue>,
}

#[derive(Debug, Error)]
#[error("notification delivery failed: {0}")]
pub struct NotifyError(pub String);

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, notification: Notification) -> Result<(), NotifyError>;
}

/// Deliver without letting a failure escape; failures are logged at `warn`.
pub async fn dispatch_best_effort(sink: &dyn NotificationSink, notification: Notification) {
    let kind = notification.kind;
    let recipient = notification.recipient;
    if let Err(e) = sink.send(notification).await {
        tracing::warn!(?kind, recipient = %recipient, error = %e, "notification dropped");
    }
}

/// Emits notifications as structured log events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotificationSink;

#[async_trait]
impl NotificationSink for TracingNotificationSink {
    async fn send(&self, notification: Notification) -> Result<(), NotifyError> {
        let metadata = serde_json::to_string(&notification.metadata)
            .map_err(|e| NotifyError(e.to_string()))?;
        tracing::info!(
            kind = ?notification.kind,
            recipient = %notification.recipient,
            metadata = %metadata,
            "notification"
        );
        Ok(())
    }
}

/// Keeps every delivered notification; can be told to fail.
#[derive(Debug, Default)]
pub struct RecordingNotificationSink {
    sent: Mutex<Vec<Notification>>,
    fail: AtomicBool,
}

impl RecordingNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_deliveries(&self, on: bool) {
        self.fail.store(on, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl NotificationSink for RecordingNotificationSink {
    async fn send(&self, notification: Notification) -> Result<(), NotifyError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(NotifyError("injected delivery failure".to_string()));
        }
        self.sent
            .lock()
            .map_err(|_| NotifyError("recorder poisoned".to_string()))?
            .push(notification);
        Ok(())
    }
}
