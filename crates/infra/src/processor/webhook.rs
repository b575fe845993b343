//! Inbound processor notifications.
//!
//! The signature header has the form `t=<unix seconds>,v1=<hex hmac>[,v1=...]`
//! where each `v1` is HMAC-SHA256 over `"{t}.{raw body}"` keyed with the
//! endpoint secret. Several `v1` entries appear while a secret is rotated.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Event types that carry a completed (or asynchronously completed) payment.
pub const SETTLEMENT_EVENTS: &[&str] = &[
    "checkout.session.completed",
    "checkout.session.async_payment_succeeded",
];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WebhookError {
    #[error("signature header is missing a timestamp")]
    MissingTimestamp,
    #[error("signature header has no v1 signature")]
    MissingSignature,
    #[error("signature header is malformed")]
    Malformed,
    #[error("signature timestamp outside tolerance")]
    Expired,
    #[error("no signature matches the payload")]
    Mismatch,
    #[error("event payload could not be decoded: {0}")]
    Payload(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: WebhookEventData,
    /// Connected account the event originated from.
    #[serde(default)]
    pub account: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEventData {
    pub object: serde_json::Value,
}

impl WebhookEvent {
    pub fn parse(payload: &[u8]) -> Result<Self, WebhookError> {
        serde_json::from_slice(payload).map_err(|e| WebhookError::Payload(e.to_string()))
    }

    pub fn is_settlement(&self) -> bool {
        SETTLEMENT_EVENTS.contains(&self.event_type.as_str())
    }

    /// Checkout session id, when the event object is a checkout session.
    pub fn session_id(&self) -> Option<&str> {
        let object = &self.data.object;
        if object.get("object").and_then(|o| o.as_str()) != Some("checkout.session") {
            return None;
        }
        object.get("id").and_then(|id| id.as_str())
    }
}

/// Verify `header` against `payload` at time `now` (unix seconds).
pub fn verify_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    tolerance_secs: i64,
    now: i64,
) -> Result<(), WebhookError> {
    let mut timestamp: Option<&str> = None;
    let mut signatures: Vec<&str> = Vec::new();

    for part in header.split(',') {
        let (key, value) = part.trim().split_once('=').ok_or(WebhookError::Malformed)?;
        match key {
            "t" => timestamp = Some(value),
            "v1" => signatures.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(WebhookError::MissingTimestamp)?;
    if signatures.is_empty() {
        return Err(WebhookError::MissingSignature);
    }
    let issued_at: i64 = timestamp.parse().map_err(|_| WebhookError::Malformed)?;
    let tolerance = u64::try_from(tolerance_secs).unwrap_or(0);
    if now.abs_diff(issued_at) > tolerance {
        return Err(WebhookError::Expired);
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| WebhookError::Malformed)?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);

    let matched = signatures.iter().any(|candidate| {
        hex::decode(candidate)
            .map(|bytes| mac.clone().verify_slice(&bytes).is_ok())
            .unwrap_or(false)
    });
    if matched { Ok(()) } else { Err(WebhookError::Mismatch) }
}

/// Header value for `payload` signed at `timestamp`.
pub fn sign(payload: &[u8], secret: &str, timestamp: i64) -> Result<String, WebhookError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| WebhookError::Malformed)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes())))
}
