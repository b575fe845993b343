//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: adapter selection (store, processor, notifications)
//! - `routes/`: HTTP routes + handlers (one file per resource)
//! - `dto.rs`: request/response DTOs and JSON mapping helpers
//! - `errors.rs`: consistent `{error, details}` error responses

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Extension, Router,
};
use tower::ServiceBuilder;

use crate::auth::Hs256JwtValidator;
use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub use services::{AppServices, WebhookSettings, build_services};

/// Build the full HTTP router around already-wired services.
pub fn build_app(jwt_secret: &str, services: Arc<AppServices>) -> Router {
    let jwt = Arc::new(Hs256JwtValidator::new(jwt_secret.as_bytes()));
    let auth_state = middleware::AuthState { jwt };

    // Protected routes: require a bearer token naming the owner.
    let protected = routes::router()
        .layer(Extension(services.clone()))
        .layer(axum::middleware::from_fn_with_state(
            auth_state,
            middleware::auth_middleware,
        ));

    // Processor notifications authenticate by signature instead.
    let public = Router::new()
        .route("/health", get(routes::system::health))
        .route("/webhooks/payments", post(routes::webhooks::payment_events))
        .layer(Extension(services));

    Router::new()
        .merge(public)
        .merge(protected)
        .layer(ServiceBuilder::new())
}
