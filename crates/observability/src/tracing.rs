//! Tracing/logging initialization.
//!
//! JSON lines on stdout. Inconsistency reports carry `inconsistency = true`
//! as a structured field, so they can be filtered out of the stream without
//! parsing messages.

use tracing_subscriber::EnvFilter;

/// Used when `RUST_LOG` is unset or unparsable.
pub const DEFAULT_FILTER: &str = "info,sqlx=warn,hyper=warn";

/// Initialize tracing for the process with `default_filter` as the fallback
/// directive set.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_current_span(true)
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .try_init();
}
