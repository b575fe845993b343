use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    response::IntoResponse,
    routing::post,
    Json, Router,
};

use crate::app::errors;
use crate::app::routes::common::parse_document_id;
use crate::app::services::AppServices;
use crate::context::OwnerContext;

pub fn router() -> Router {
    Router::new()
        .route("/sweep-overdue", post(sweep_overdue))
        .route("/:id/payment-link", post(create_payment_link))
        .route("/:id/verify-payment", post(verify_payment))
}

pub async fn create_payment_link(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(owner): Extension<OwnerContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let invoice_id = match parse_document_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.documents.create_payment_link(owner.owner_id(), invoice_id).await {
        Ok(link) => Json(link).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

/// Pull-path verification, typically fired when the payer lands back on the
/// success page. Waits briefly so a processor notification already in flight
/// usually lands first.
pub async fn verify_payment(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(owner): Extension<OwnerContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let invoice_id = match parse_document_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    if !services.verify_precheck_delay.is_zero() {
        tokio::time::sleep(services.verify_precheck_delay).await;
    }

    match services
        .documents
        .verify_payment_for_document(owner.owner_id(), invoice_id)
        .await
    {
        Ok(outcome) => Json(outcome).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn sweep_overdue(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(owner): Extension<OwnerContext>,
) -> axum::response::Response {
    match services.documents.sweep_overdue(owner.owner_id()).await {
        Ok(report) => Json(report).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}
