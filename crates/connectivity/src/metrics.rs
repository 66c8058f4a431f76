//! Prometheus metrics for connectivity checks.

use crate::dispatch::Observation;
use crate::types::ConnectivityCheck;
use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::{DescriptorEncoder, EncodeLabelSet, EncodeMetric};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use std::fmt;
use std::sync::atomic::AtomicU64;

/// Namespace of every exported series.
pub const METRIC_PREFIX: &str = "connectivity";

/// Metric names and help texts, shared by the scheduled registry and the
/// pull collectors so both describe a series the same way.
pub mod descriptors {
    pub struct Descriptor {
        pub name: &'static str,
        pub help: &'static str,
    }

    pub const HOST_PACKET_LOSS: Descriptor = Descriptor {
        name: "host_packet_loss",
        help: "Packet loss between instance and remote host.",
    };

    pub const HOST_RTT: Descriptor = Descriptor {
        name: "host_rtt",
        help: "RTT between instance and remote host.",
    };

    pub const SERVICE_LATENCY: Descriptor = Descriptor {
        name: "service_latency",
        help: "Latency between the instance and a remote service.",
    };

    pub const SERVICE_THROUGHPUT: Descriptor = Descriptor {
        name: "service_throughput",
        help: "Whether the instance can use a remote service.",
    };

    pub const CHECK_FAILURES: Descriptor = Descriptor {
        name: "check_failures",
        help: "Scheduled connectivity checks that failed.",
    };

    pub const COLLECTION_FAILURES: Descriptor = Descriptor {
        name: "collection_failures",
        help: "Connectivity checks that failed while collecting on pull.",
    };
}

use descriptors::Descriptor;

/// Labels for host level series
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct HostLabels {
    /// Address family (ip4, ip6)
    pub af: String,
    /// Configured host
    pub host: String,
}

impl HostLabels {
    fn of(observation: &Observation) -> Self {
        Self {
            af: observation.af().as_str().to_string(),
            host: observation.host().to_string(),
        }
    }
}

/// Labels for service level series and failure counters
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ServiceLabels {
    pub af: String,
    pub host: String,
    /// Configured service, empty for pings
    pub service: String,
    /// Check kind (ping, flood, connect, transfer)
    pub kind: String,
}

impl ServiceLabels {
    fn of(observation: &Observation) -> Self {
        let (service, kind) = match observation {
            Observation::ServiceLatency { service, kind, .. }
            | Observation::ServiceThroughput { service, kind, .. } => {
                (service.as_str(), kind.as_str())
            }
            Observation::HostPacketLoss { .. } | Observation::HostRtt { .. } => ("", ""),
        };
        Self {
            af: observation.af().as_str().to_string(),
            host: observation.host().to_string(),
            service: service.to_string(),
            kind: kind.to_string(),
        }
    }

    /// Labels identifying a failed check as it was configured.
    pub fn for_check(check: &ConnectivityCheck) -> Self {
        Self {
            af: check.network.as_str().to_string(),
            host: check.host.clone(),
            service: check.service_label().to_string(),
            kind: check.kind.as_str().to_string(),
        }
    }
}

pub type HostGaugeFamily = Family<HostLabels, Gauge<f64, AtomicU64>>;
pub type ServiceGaugeFamily = Family<ServiceLabels, Gauge<f64, AtomicU64>>;
pub type FailureFamily = Family<ServiceLabels, Counter>;

/// The four gauge families observations are written into
#[derive(Clone, Debug, Default)]
pub struct ObservationFamilies {
    pub host_packet_loss: HostGaugeFamily,
    pub host_rtt: HostGaugeFamily,
    pub service_latency: ServiceGaugeFamily,
    pub service_throughput: ServiceGaugeFamily,
}

impl ObservationFamilies {
    /// Set the gauge an observation belongs to. Last write wins.
    pub fn record(&self, observation: &Observation) {
        match observation {
            Observation::HostPacketLoss { value, .. } => {
                self.host_packet_loss
                    .get_or_create(&HostLabels::of(observation))
                    .set(*value);
            }
            Observation::HostRtt { seconds, .. } => {
                self.host_rtt
                    .get_or_create(&HostLabels::of(observation))
                    .set(*seconds);
            }
            Observation::ServiceLatency { seconds, .. } => {
                self.service_latency
                    .get_or_create(&ServiceLabels::of(observation))
                    .set(*seconds);
            }
            Observation::ServiceThroughput {
                bytes_per_second, ..
            } => {
                self.service_throughput
                    .get_or_create(&ServiceLabels::of(observation))
                    .set(*bytes_per_second);
            }
        }
    }

    /// Drop the series an observation was recorded into.
    pub fn forget(&self, observation: &Observation) {
        match observation {
            Observation::HostPacketLoss { .. } => {
                self.host_packet_loss.remove(&HostLabels::of(observation));
            }
            Observation::HostRtt { .. } => {
                self.host_rtt.remove(&HostLabels::of(observation));
            }
            Observation::ServiceLatency { .. } => {
                self.service_latency.remove(&ServiceLabels::of(observation));
            }
            Observation::ServiceThroughput { .. } => {
                self.service_throughput.remove(&ServiceLabels::of(observation));
            }
        }
    }

    fn register(&self, registry: &mut Registry) {
        use descriptors::*;

        for (descriptor, family) in [
            (&HOST_PACKET_LOSS, &self.host_packet_loss),
            (&HOST_RTT, &self.host_rtt),
        ] {
            registry.register(descriptor.name, descriptor.help, family.clone());
        }
        for (descriptor, family) in [
            (&SERVICE_LATENCY, &self.service_latency),
            (&SERVICE_THROUGHPUT, &self.service_throughput),
        ] {
            registry.register(descriptor.name, descriptor.help, family.clone());
        }
    }

    /// Encode all four families through a collector's encoder.
    pub fn encode(&self, encoder: &mut DescriptorEncoder) -> fmt::Result {
        use descriptors::*;

        encode_family(encoder, &HOST_PACKET_LOSS, &self.host_packet_loss)?;
        encode_family(encoder, &HOST_RTT, &self.host_rtt)?;
        encode_family(encoder, &SERVICE_LATENCY, &self.service_latency)?;
        encode_family(encoder, &SERVICE_THROUGHPUT, &self.service_throughput)
    }
}

fn encode_family(
    encoder: &mut DescriptorEncoder,
    descriptor: &Descriptor,
    family: &impl EncodeMetric,
) -> fmt::Result {
    let metric_encoder =
        encoder.encode_descriptor(descriptor.name, descriptor.help, None, family.metric_type())?;
    family.encode(metric_encoder)
}

/// Process-wide registry written by scheduled checks and pull refreshes
pub struct MetricsRegistry {
    registry: Registry,
    observations: ObservationFamilies,
    check_failures: FailureFamily,
    collection_failures: FailureFamily,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix(METRIC_PREFIX);

        let observations = ObservationFamilies::default();
        observations.register(&mut registry);

        let check_failures = FailureFamily::default();
        registry.register(
            descriptors::CHECK_FAILURES.name,
            descriptors::CHECK_FAILURES.help,
            check_failures.clone(),
        );

        let collection_failures = FailureFamily::default();
        registry.register(
            descriptors::COLLECTION_FAILURES.name,
            descriptors::COLLECTION_FAILURES.help,
            collection_failures.clone(),
        );

        Self {
            registry,
            observations,
            check_failures,
            collection_failures,
        }
    }

    /// Record the observations of one successful check.
    pub fn record(&self, observations: &[Observation]) {
        for observation in observations {
            self.observations.record(observation);
        }
    }

    /// Drop the series written by earlier observations.
    pub fn forget(&self, observations: &[Observation]) {
        for observation in observations {
            self.observations.forget(observation);
        }
    }

    /// Count a failed scheduled check.
    pub fn record_check_failure(&self, check: &ConnectivityCheck) {
        self.check_failures
            .get_or_create(&ServiceLabels::for_check(check))
            .inc();
    }

    /// Counter family pull collectors report their failures into.
    pub fn collection_failures(&self) -> FailureFamily {
        self.collection_failures.clone()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Encode the registry in the OpenMetrics text format.
    pub fn encode(&self) -> Result<String, fmt::Error> {
        let mut buffer = String::new();
        encode(&mut buffer, &self.registry)?;
        Ok(buffer)
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Find the value of one series in an OpenMetrics text exposition.
///
/// `series` is the metric name with its label set, exactly as encoded.
#[cfg(any(test, feature = "test-util"))]
pub fn sample_value(exposition: &str, series: &str) -> Option<f64> {
    exposition.lines().find_map(|line| {
        line.strip_prefix(series)
            .and_then(|rest| rest.strip_prefix(' '))
            .and_then(|value| value.split_whitespace().next())
            .and_then(|value| value.parse().ok())
    })
}
