//! HTTP endpoints: `/metrics`, `/probe` and a redirect on `/`.

use axum::{
    Router,
    extract::{Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use connectivity::collector::probe;
use connectivity::{Checker, ConnectivityCheck, ConnectivityCollector, MetricsRegistry};
use serde::Deserialize;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

/// Content type of the OpenMetrics text format
pub const OPENMETRICS_CONTENT_TYPE: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

/// State shared by all handlers
#[derive(Clone)]
pub struct AppState {
    /// Process-wide registry
    pub metrics: Arc<MetricsRegistry>,
    /// Checker used for on-demand probes
    pub checker: Arc<dyn Checker>,
    /// Checks refreshed on every `/metrics` scrape
    pub pull: Option<ConnectivityCollector>,
}

/// Build the router. `/probe` is only routed when `probe_enabled` is set.
pub fn router(state: AppState, probe_enabled: bool) -> Router {
    let mut router = Router::new()
        .route("/", get(root_handler))
        .route("/metrics", get(metrics_handler));
    if probe_enabled {
        router = router.route("/probe", get(probe_handler));
    }

    router
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

/// HTTP server for the exporter endpoints
pub struct MetricsServer {
    router: Router,
    listen_addr: String,
}

impl MetricsServer {
    pub fn new(state: AppState, probe_enabled: bool, listen_addr: String) -> Self {
        Self {
            router: router(state, probe_enabled),
            listen_addr,
        }
    }

    /// Serve until `shutdown` resolves, then drain in-flight requests.
    pub async fn run<F>(self, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(bind_addr(&self.listen_addr)).await?;
        info!(listen_addr = %self.listen_addr, "Metrics server listening");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await
    }
}

/// An empty host (`:9560`) listens on all interfaces.
fn bind_addr(listen_addr: &str) -> String {
    match listen_addr.strip_prefix(':') {
        Some(port) => format!("0.0.0.0:{port}"),
        None => listen_addr.to_string(),
    }
}

async fn root_handler() -> Response {
    (StatusCode::FOUND, [(header::LOCATION, "/metrics")]).into_response()
}

/// Handler for /metrics endpoint
async fn metrics_handler(State(state): State<AppState>) -> Response {
    if let Some(pull) = &state.pull {
        pull.refresh(&state.metrics).await;
    }

    match state.metrics.encode() {
        Ok(buffer) => openmetrics_response(buffer),
        Err(e) => {
            warn!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {e}"),
            )
                .into_response()
        }
    }
}

/// Query parameters of `/probe`
#[derive(Debug, Default, Deserialize)]
pub struct ProbeParams {
    pub kind: Option<String>,
    pub af: Option<String>,
    pub target: Option<String>,
    pub service: Option<String>,
}

/// Handler for /probe endpoint
async fn probe_handler(
    State(state): State<AppState>,
    Query(params): Query<ProbeParams>,
) -> Response {
    let check = match probe_check(&params) {
        Ok(check) => check,
        Err(e) => {
            debug!(error = %e, "Rejected probe request");
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    };

    info!(check = %check, "Running probe");
    match probe(check, state.checker.clone()).await {
        Ok(buffer) => openmetrics_response(buffer),
        Err(e) => {
            warn!(error = %e, "Failed to encode probe metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {e}"),
            )
                .into_response()
        }
    }
}

fn probe_check(params: &ProbeParams) -> common::Result<ConnectivityCheck> {
    let kind = match params.kind.as_deref() {
        Some(kind) if !kind.is_empty() => kind,
        _ => return Err(common::Error::config("missing kind parameter")),
    };
    ConnectivityCheck::on_demand(
        kind,
        params.af.as_deref(),
        params.target.as_deref(),
        params.service.as_deref(),
    )
}

fn openmetrics_response(buffer: String) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, OPENMETRICS_CONTENT_TYPE)],
        buffer,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use connectivity::CheckKind;

    fn params(kind: &str, target: Option<&str>, service: Option<&str>) -> ProbeParams {
        ProbeParams {
            kind: Some(kind.to_string()),
            af: None,
            target: target.map(str::to_string),
            service: service.map(str::to_string),
        }
    }

    #[test]
    fn test_probe_check_from_params() {
        let check = probe_check(&params("connect", Some("db"), Some("5432"))).unwrap();
        assert_eq!(check.kind, CheckKind::Connect);
        assert_eq!(check.host, "db");
        assert_eq!(check.service(), Some("5432"));
    }

    #[test]
    fn test_bind_addr() {
        assert_eq!(bind_addr(":9560"), "0.0.0.0:9560");
        assert_eq!(bind_addr("localhost:9560"), "localhost:9560");
        assert_eq!(bind_addr("[::1]:9560"), "[::1]:9560");
    }

    #[test]
    fn test_probe_check_errors() {
        let err = probe_check(&ProbeParams::default()).unwrap_err();
        assert_eq!(err.to_string(), "missing kind parameter");

        let err = probe_check(&params("ping", None, None)).unwrap_err();
        assert_eq!(err.to_string(), "missing target parameter");

        let err = probe_check(&params("transfer", Some("a"), Some(""))).unwrap_err();
        assert_eq!(err.to_string(), "missing service parameter");

        let err = probe_check(&params("traceroute", Some("a"), None)).unwrap_err();
        assert!(err.is_config());
    }
}
