use axum::{routing::get, Router};

pub mod common;
pub mod documents;
pub mod invoices;
pub mod payments;
pub mod quotes;
pub mod system;
pub mod webhooks;

/// Router for all authenticated (owner-scoped) endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .nest("/documents", documents::router())
        .nest("/quotes", quotes::router())
        .nest("/invoices", invoices::router())
        .nest("/payments", payments::router())
}
