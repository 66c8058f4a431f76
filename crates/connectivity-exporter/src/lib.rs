//! Connectivity exporter
//!
//! Serves connectivity measurements over HTTP in the OpenMetrics format.
//!
//! # Components
//!
//! - **Config**: YAML file plus command line overrides
//! - **HTTP server**: `/metrics` for scheduled and scrape-time checks,
//!   `/probe` for one-off checks
//! - **Server**: starts the checks and handles shutdown signals

pub mod cli;
pub mod config;
pub mod http_server;
pub mod server;

pub use cli::Args;
pub use config::{Config, ConfigError};
pub use http_server::{AppState, MetricsServer, router};
pub use server::ExporterServer;
