//! Logging utilities for the connectivity exporter components.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize tracing with an explicit default level.
///
/// RUST_LOG still takes precedence when set.
pub fn init_with(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}
