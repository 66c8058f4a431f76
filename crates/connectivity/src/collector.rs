//! Checks run at scrape time.

use crate::checkers::Checker;
use crate::dispatch::{Observation, do_check};
use crate::metrics::{
    FailureFamily, METRIC_PREFIX, MetricsRegistry, ObservationFamilies, ServiceLabels, descriptors,
};
use crate::types::ConnectivityCheck;
use prometheus_client::collector::Collector;
use prometheus_client::encoding::DescriptorEncoder;
use prometheus_client::encoding::text::encode;
use prometheus_client::registry::Registry;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

/// Runs a fixed list of checks on demand and exposes the latest samples.
///
/// [`collect`](Self::collect) refreshes the samples; encoding only reads
/// them, so repeated scrapes between two collections are identical.
#[derive(Clone)]
pub struct ConnectivityCollector {
    checks: Arc<[ConnectivityCheck]>,
    checker: Arc<dyn Checker>,
    failures: FailureFamily,
    snapshot: Arc<Mutex<Vec<Observation>>>,
    refresh_lock: Arc<tokio::sync::Mutex<()>>,
}

impl ConnectivityCollector {
    pub fn new(
        checks: Vec<ConnectivityCheck>,
        checker: Arc<dyn Checker>,
        failures: FailureFamily,
    ) -> Self {
        Self {
            checks: checks.into(),
            checker,
            failures,
            snapshot: Arc::default(),
            refresh_lock: Arc::default(),
        }
    }

    pub fn checks(&self) -> &[ConnectivityCheck] {
        &self.checks
    }

    /// Run every check once, in order, and replace the samples.
    ///
    /// A failing check is counted and logged; the remaining checks still run.
    pub async fn collect(&self) {
        let mut samples = Vec::new();

        for check in self.checks.iter() {
            match do_check(check, self.checker.as_ref()).await {
                Ok(observations) => samples.extend(observations),
                Err(e) => {
                    warn!(check = %check, error = %e, "Connectivity check failed during collection");
                    self.failures
                        .get_or_create(&ServiceLabels::for_check(check))
                        .inc();
                }
            }
        }

        debug!(checks = self.checks.len(), samples = samples.len(), "Collected connectivity samples");
        *self.snapshot.lock().unwrap_or_else(PoisonError::into_inner) = samples;
    }

    /// Collect, then make `metrics` carry exactly this collection's samples.
    ///
    /// Series written by the previous refresh are removed first, so a check
    /// that fails now stops reporting its last good value.
    pub async fn refresh(&self, metrics: &MetricsRegistry) {
        let _guard = self.refresh_lock.lock().await;

        let previous = self.snapshot();
        self.collect().await;
        metrics.forget(&previous);
        metrics.record(&self.snapshot());
    }

    /// Samples of the last collection.
    pub fn snapshot(&self) -> Vec<Observation> {
        self.snapshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Register the samples and the failure counter with `registry`.
    pub fn register(&self, registry: &mut Registry) {
        registry.register(
            descriptors::COLLECTION_FAILURES.name,
            descriptors::COLLECTION_FAILURES.help,
            self.failures.clone(),
        );
        registry.register_collector(Box::new(self.clone()));
    }
}

impl fmt::Debug for ConnectivityCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectivityCollector")
            .field("checks", &self.checks)
            .finish_non_exhaustive()
    }
}

impl Collector for ConnectivityCollector {
    fn encode(&self, mut encoder: DescriptorEncoder) -> Result<(), fmt::Error> {
        let families = ObservationFamilies::default();
        for observation in self.snapshot().iter() {
            families.record(observation);
        }
        families.encode(&mut encoder)
    }
}

/// Run a single check in an isolated registry and encode the result.
///
/// Nothing outside the returned exposition is touched.
pub async fn probe(check: ConnectivityCheck, checker: Arc<dyn Checker>) -> Result<String, fmt::Error> {
    let mut registry = Registry::with_prefix(METRIC_PREFIX);
    let collector = ConnectivityCollector::new(vec![check], checker, FailureFamily::default());
    collector.register(&mut registry);
    collector.collect().await;

    let mut buffer = String::new();
    encode(&mut buffer, &registry)?;
    Ok(buffer)
}
