//! Infrastructure layer: document store, payment processor, notifications,
//! configuration, and the services that orchestrate them.

pub mod config;
pub mod error;
pub mod notify;
pub mod processor;
pub mod saga;
pub mod services;
pub mod store;

pub use config::AppConfig;
pub use error::{ServiceError, ServiceResult};
pub use services::DocumentServices;
