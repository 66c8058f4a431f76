//! Turns a check into metric observations.

use crate::checkers::Checker;
use crate::types::{AddressFamily, CheckKind, ConnectivityCheck, Transport};
use common::{Error, Result};
use tracing::debug;

/// One metric sample produced by a check
#[derive(Debug, Clone, PartialEq)]
pub enum Observation {
    HostPacketLoss {
        af: AddressFamily,
        host: String,
        value: f64,
    },
    HostRtt {
        af: AddressFamily,
        host: String,
        seconds: f64,
    },
    ServiceLatency {
        af: AddressFamily,
        host: String,
        service: String,
        kind: CheckKind,
        seconds: f64,
    },
    ServiceThroughput {
        af: AddressFamily,
        host: String,
        service: String,
        kind: CheckKind,
        bytes_per_second: f64,
    },
}

impl Observation {
    pub fn af(&self) -> AddressFamily {
        match self {
            Observation::HostPacketLoss { af, .. }
            | Observation::HostRtt { af, .. }
            | Observation::ServiceLatency { af, .. }
            | Observation::ServiceThroughput { af, .. } => *af,
        }
    }

    pub fn host(&self) -> &str {
        match self {
            Observation::HostPacketLoss { host, .. }
            | Observation::HostRtt { host, .. }
            | Observation::ServiceLatency { host, .. }
            | Observation::ServiceThroughput { host, .. } => host,
        }
    }

    pub fn value(&self) -> f64 {
        match self {
            Observation::HostPacketLoss { value, .. } => *value,
            Observation::HostRtt { seconds, .. } => *seconds,
            Observation::ServiceLatency { seconds, .. } => *seconds,
            Observation::ServiceThroughput {
                bytes_per_second, ..
            } => *bytes_per_second,
        }
    }
}

/// Resolve the check's host and service, run the measurement its kind
/// implies and translate the result into observations.
///
/// The `af` label of every observation is the family of the first resolved
/// address. Either every observation of a check is returned or none is.
pub async fn do_check(check: &ConnectivityCheck, checker: &dyn Checker) -> Result<Vec<Observation>> {
    if check.kind.requires_service() && check.service().is_none() {
        return Err(Error::config(format!("missing service parameter: {check}")));
    }

    let resolver = checker.resolver();
    let addrs = resolver.lookup_ip(check.network, &check.host).await?;
    let Some(addr) = addrs.first().map(|addr| addr.to_canonical()) else {
        return Err(Error::resolve(format!("no addresses found for {}", check.host)));
    };
    let af = AddressFamily::of(&addr);

    let port = match check.service() {
        Some(service) => {
            let transport = Transport::for_check(check.network, check.kind);
            Some(resolver.lookup_port(transport, service).await?)
        }
        None => None,
    };
    debug!(check = %check, %addr, ?port, "Resolved check target");

    let host = check.host.clone();
    let service = check.service_label().to_string();
    let kind = check.kind;

    let observations = match (kind, port) {
        (CheckKind::HostPing, _) => {
            let stats = checker.ping(af, addr, false).await?;
            vec![Observation::HostRtt {
                af,
                host,
                seconds: stats.avg_rtt.as_secs_f64(),
            }]
        }
        (CheckKind::HostFloodPing, _) => {
            let stats = checker.ping(af, addr, true).await?;
            vec![
                Observation::HostPacketLoss {
                    af,
                    host: host.clone(),
                    value: stats.packet_loss,
                },
                Observation::HostRtt {
                    af,
                    host,
                    seconds: stats.avg_rtt.as_secs_f64(),
                },
            ]
        }
        (CheckKind::Connect, Some(port)) => {
            let elapsed = checker.connect(af, addr, port).await?;
            vec![Observation::ServiceLatency {
                af,
                host,
                service,
                kind,
                seconds: elapsed.as_secs_f64(),
            }]
        }
        (CheckKind::Transfer, Some(port)) => {
            let stats = checker.transfer(af, addr, port).await?;
            vec![
                Observation::ServiceLatency {
                    af,
                    host: host.clone(),
                    service: service.clone(),
                    kind,
                    seconds: stats.dial_duration.as_secs_f64(),
                },
                Observation::ServiceThroughput {
                    af,
                    host,
                    service,
                    kind,
                    bytes_per_second: stats.bytes as f64 / stats.duration.as_secs_f64(),
                },
            ]
        }
        (CheckKind::Connect | CheckKind::Transfer, None) => {
            return Err(Error::config(format!("missing service parameter: {check}")));
        }
    };

    Ok(observations)
}
