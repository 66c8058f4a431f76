//! Connectivity exporter binary

use anyhow::Context;
use clap::Parser;
use connectivity_exporter::{Args, Config, ExporterServer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Tracing is not initialized yet; config errors are returned to the caller.
    let mut config = Config::load(args.config.as_deref()).context("failed to load configuration")?;
    config.apply_args(&args)?;

    common::logging::init_with(config.logging.level(), config.logging.json());

    config.check()?;
    tracing::info!(
        http_addr = %config.server.http_addr,
        checks = config.checks.len(),
        "Configuration loaded successfully"
    );

    ExporterServer::new(config).run().await
}
