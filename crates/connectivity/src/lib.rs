//! Network connectivity checks exported as Prometheus metrics.
//!
//! A check measures one of:
//! - ICMP round-trip time to a host (`ping`)
//! - ICMP round-trip time and packet loss under load (`flood`)
//! - TCP handshake latency to a service (`connect`)
//! - dial latency and throughput of a stream echo service (`transfer`)
//!
//! Checks run either on a schedule, writing into the process-wide
//! [`MetricsRegistry`], or at scrape time through a
//! [`ConnectivityCollector`].
//!
//! # Example
//!
//! ```no_run
//! use connectivity::{
//!     ConnectivityCheck, KeywordResolver, MeasurementSettings, MetricsRegistry, NetChecker,
//!     RouteTableGateway, SystemResolver, scheduler,
//! };
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let resolver = KeywordResolver::new(SystemResolver::new(), RouteTableGateway::default());
//! let checker = Arc::new(NetChecker::new(resolver, MeasurementSettings::default()));
//! let metrics = Arc::new(MetricsRegistry::new());
//!
//! let checks = vec![ConnectivityCheck::from_flag("kind=ping,host=default-gateway.internal,interval=1m")?];
//! let token = CancellationToken::new();
//! let handles = scheduler::start_checks(checks, checker, metrics.clone(), token.clone());
//!
//! println!("{}", metrics.encode()?);
//! token.cancel();
//! for handle in handles {
//!     handle.await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod checkers;
pub mod collector;
pub mod dispatch;
pub mod metrics;
pub mod ping;
pub mod resolver;
pub mod scheduler;
pub mod types;

pub use checkers::{Checker, MeasurementSettings, NetChecker};
pub use collector::ConnectivityCollector;
pub use dispatch::{Observation, do_check};
pub use metrics::MetricsRegistry;
pub use resolver::{
    DEFAULT_GATEWAY_HOST, GatewayDiscovery, KeywordResolver, Resolver, RouteTableGateway,
    SystemResolver,
};
pub use types::{
    AddressFamily, CheckKind, ConnectivityCheck, PingStats, Protocol, Transport, TransferStats,
};
