use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    response::IntoResponse,
    routing::post,
    Json, Router,
};

use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::OwnerContext;

pub fn router() -> Router {
    Router::new().route("/sessions/:session_id/verify", post(verify_session))
}

/// Push-path verification by checkout session, scoped to the caller.
pub async fn verify_session(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(owner): Extension<OwnerContext>,
    Path(session_id): Path<String>,
) -> axum::response::Response {
    match services
        .documents
        .verify_payment_for_session(Some(owner.owner_id()), &session_id)
        .await
    {
        Ok(outcome) => Json(outcome).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}
