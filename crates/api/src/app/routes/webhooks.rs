//! Processor notifications. Unauthenticated; every delivery must carry a
//! valid signature.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use secrecy::ExposeSecret;
use serde_json::json;

use tally_infra::processor::webhook::{WebhookEvent, verify_signature};

use crate::app::errors;
use crate::app::services::AppServices;

pub const SIGNATURE_HEADER: &str = "stripe-signature";

pub async fn payment_events(
    Extension(services): Extension<Arc<AppServices>>,
    headers: HeaderMap,
    body: Bytes,
) -> axum::response::Response {
    let Some(secret) = services.webhook.secret.as_ref() else {
        tracing::warn!("webhook delivery refused: no webhook secret configured");
        return errors::json_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "webhook_not_configured",
            "no webhook secret configured",
        );
    };

    let Some(signature) = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok()) else {
        return errors::json_error(StatusCode::BAD_REQUEST, "invalid_signature", "missing signature header");
    };

    if let Err(e) = verify_signature(
        &body,
        signature,
        secret.expose_secret(),
        services.webhook.tolerance_secs,
        Utc::now().timestamp(),
    ) {
        tracing::warn!(error = %e, "webhook signature rejected");
        return errors::json_error(StatusCode::BAD_REQUEST, "invalid_signature", e.to_string());
    }

    let event = match WebhookEvent::parse(&body) {
        Ok(ev) => ev,
        Err(e) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_payload", e.to_string()),
    };

    let session_id = match (event.is_settlement(), event.session_id()) {
        (true, Some(id)) => id.to_string(),
        _ => {
            tracing::debug!(event_id = %event.id, event_type = %event.event_type, "webhook event ignored");
            return Json(json!({ "received": true, "ignored": true })).into_response();
        }
    };

    tracing::info!(
        event_id = %event.id,
        session_id = %session_id,
        account = event.account.as_deref().unwrap_or("-"),
        "settlement event received"
    );
    match services.documents.verify_payment_for_session(None, &session_id).await {
        Ok(outcome) => Json(json!({ "received": true, "outcome": outcome })).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}
