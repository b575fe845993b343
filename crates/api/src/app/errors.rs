use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use tally_core::DomainError;
use tally_infra::error::{ServiceError, UpstreamError};

pub fn service_error_to_response(err: ServiceError) -> axum::response::Response {
    let status = match &err {
        ServiceError::Validation(_) => StatusCode::BAD_REQUEST,
        ServiceError::Authorization(_) => StatusCode::FORBIDDEN,
        ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
        ServiceError::Upstream { source, .. } => match source {
            UpstreamError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            UpstreamError::Processor(_) | UpstreamError::MissingCheckoutUrl { .. } => {
                StatusCode::BAD_GATEWAY
            }
            UpstreamError::NumberSpaceExhausted { .. } => StatusCode::SERVICE_UNAVAILABLE,
        },
        ServiceError::Inconsistency(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    json_error(status, err.code(), err.to_string())
}

pub fn domain_error_to_response(err: DomainError) -> axum::response::Response {
    service_error_to_response(err.into())
}

/// Malformed, mistyped or wrongly labelled request bodies.
pub fn json_rejection_to_response(rejection: JsonRejection) -> axum::response::Response {
    json_error(StatusCode::BAD_REQUEST, "validation_error", rejection.body_text())
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    details: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "details": details.into(),
        })),
    )
        .into_response()
}
