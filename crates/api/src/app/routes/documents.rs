use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use tally_documents::DocumentStatus;

use crate::app::routes::common::parse_document_id;
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::OwnerContext;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_document))
        .route("/:id", get(get_document))
        .route("/:id/status", post(change_status))
}

pub async fn create_document(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(owner): Extension<OwnerContext>,
    body: Result<Json<dto::CreateDocumentRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(rejection) => return errors::json_rejection_to_response(rejection),
    };
    let request = match body.into_new_document() {
        Ok(r) => r,
        Err(resp) => return resp,
    };

    match services.documents.create_document(owner.owner_id(), request).await {
        Ok(created) => (
            StatusCode::CREATED,
            Json(dto::document_with_items_to_json(&created.document, &created.items)),
        )
            .into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn get_document(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(owner): Extension<OwnerContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match parse_document_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.documents.get_document(owner.owner_id(), id).await {
        Ok((doc, items)) => Json(dto::document_with_items_to_json(&doc, &items)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn change_status(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(owner): Extension<OwnerContext>,
    Path(id): Path<String>,
    body: Result<Json<dto::ChangeStatusRequest>, JsonRejection>,
) -> axum::response::Response {
    let id = match parse_document_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Json(body) = match body {
        Ok(b) => b,
        Err(rejection) => return errors::json_rejection_to_response(rejection),
    };

    let kind = match services.documents.get_document(owner.owner_id(), id).await {
        Ok((doc, _)) => doc.kind,
        Err(e) => return errors::service_error_to_response(e),
    };
    let next = match DocumentStatus::parse(kind, &body.status) {
        Ok(s) => s,
        Err(e) => return errors::domain_error_to_response(e),
    };

    match services.documents.transition_status(owner.owner_id(), id, next).await {
        Ok(doc) => Json(dto::document_to_json(&doc)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}
