//! Wires checks, metrics and the HTTP server together.

use crate::config::Config;
use crate::http_server::{AppState, MetricsServer};
use anyhow::Context;
use connectivity::{
    Checker, ConnectivityCollector, KeywordResolver, MetricsRegistry, NetChecker,
    RouteTableGateway, SystemResolver, scheduler,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Connectivity exporter process
pub struct ExporterServer {
    config: Config,
}

impl ExporterServer {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Run with the system resolver and real network measurements.
    pub async fn run(self) -> anyhow::Result<()> {
        let resolver = KeywordResolver::new(SystemResolver::new(), RouteTableGateway::default());
        let checker = Arc::new(NetChecker::new(resolver, self.config.measurement_settings()));
        self.run_with_checker(checker).await
    }

    /// Run until SIGINT/SIGTERM using `checker` for every measurement.
    ///
    /// The first signal stops the checks and drains the HTTP server; a
    /// second one closes it immediately.
    pub async fn run_with_checker(self, checker: Arc<dyn Checker>) -> anyhow::Result<()> {
        let config = self.config;
        let metrics = Arc::new(MetricsRegistry::new());
        let token = CancellationToken::new();

        info!(
            checks = config.checks.len(),
            pull_checks = config.pull_checks.len(),
            probe_enabled = config.server.probe_enabled,
            "Starting connectivity exporter"
        );

        let handles = scheduler::start_checks(
            config.checks.clone(),
            checker.clone(),
            metrics.clone(),
            token.clone(),
        );

        let pull = (!config.pull_checks.is_empty()).then(|| {
            ConnectivityCollector::new(
                config.pull_checks.clone(),
                checker.clone(),
                metrics.collection_failures(),
            )
        });

        let state = AppState {
            metrics,
            checker,
            pull,
        };
        let server = MetricsServer::new(
            state,
            config.server.probe_enabled,
            config.server.http_addr.clone(),
        );
        let mut serve = tokio::spawn(server.run(token.clone().cancelled_owned()));

        tokio::select! {
            result = &mut serve => {
                // The server only stops on its own when it failed.
                token.cancel();
                drain(handles, config.shutdown.drain_timeout).await;
                result.context("metrics server task failed")??;
                return Ok(());
            }
            _ = shutdown_signal() => {
                info!("Received shutdown signal, stopping checks");
                token.cancel();
            }
        }

        tokio::select! {
            result = &mut serve => {
                result.context("metrics server task failed")??;
            }
            _ = shutdown_signal() => {
                warn!("Received second shutdown signal, closing immediately");
                serve.abort();
            }
        }

        drain(handles, config.shutdown.drain_timeout).await;
        info!("Connectivity exporter stopped");
        Ok(())
    }
}

/// Wait for the check tasks to wind down, giving up after `timeout`.
async fn drain(handles: Vec<JoinHandle<()>>, timeout: Duration) {
    let wait_all = async {
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Check task failed");
            }
        }
    };

    if tokio::time::timeout(timeout, wait_all).await.is_err() {
        warn!(timeout_ms = timeout.as_millis() as u64, "Check tasks did not stop in time");
    }
}

/// Resolve on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
