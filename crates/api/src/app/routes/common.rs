use axum::http::StatusCode;

use tally_core::DocumentId;

use crate::app::errors;

pub fn parse_document_id(raw: &str) -> Result<DocumentId, axum::response::Response> {
    raw.parse()
        .map_err(|_| errors::json_error(StatusCode::BAD_REQUEST, "validation_error", "invalid document id"))
}
