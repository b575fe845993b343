use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};

use crate::app::routes::common::parse_document_id;
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::OwnerContext;

pub fn router() -> Router {
    Router::new().route("/:id/convert", post(convert_quote))
}

pub async fn convert_quote(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(owner): Extension<OwnerContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let quote_id = match parse_document_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.documents.convert_quote(owner.owner_id(), quote_id).await {
        Ok(created) => (
            StatusCode::CREATED,
            Json(dto::document_with_items_to_json(&created.document, &created.items)),
        )
            .into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}
