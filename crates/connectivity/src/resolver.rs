//! Host and port resolution.
//!
//! Checks resolve names before measuring anything, so resolver
//! performance never ends up in the reported latencies. The
//! [`KeywordResolver`] decorates any [`Resolver`] and understands one
//! magic host name:
//!
//! - `default-gateway.internal` resolves to one of the default gateways
//!   of this host.

use crate::types::{AddressFamily, Protocol, Transport};
use async_trait::async_trait;
use common::{Error, Result};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use tracing::debug;

/// Host name resolved through gateway discovery instead of DNS.
pub const DEFAULT_GATEWAY_HOST: &str = "default-gateway.internal";

/// Name and port lookups used by the dispatcher
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Resolve a host to its addresses, honoring the family hint.
    async fn lookup_ip(&self, family: AddressFamily, host: &str) -> Result<Vec<IpAddr>>;

    /// Resolve a service name or number to a port for the transport.
    async fn lookup_port(&self, transport: Transport, service: &str) -> Result<u16>;
}

/// Finds the default gateway of this host
pub trait GatewayDiscovery: Send + Sync {
    fn discover(&self) -> Result<IpAddr>;
}

impl<F> GatewayDiscovery for F
where
    F: Fn() -> Result<IpAddr> + Send + Sync,
{
    fn discover(&self) -> Result<IpAddr> {
        self()
    }
}

/// Resolver that intercepts [`DEFAULT_GATEWAY_HOST`] and delegates
/// everything else.
pub struct KeywordResolver<R, G> {
    inner: R,
    discover_gateway: G,
}

impl<R, G> KeywordResolver<R, G> {
    pub fn new(inner: R, discover_gateway: G) -> Self {
        Self {
            inner,
            discover_gateway,
        }
    }
}

#[async_trait]
impl<R, G> Resolver for KeywordResolver<R, G>
where
    R: Resolver,
    G: GatewayDiscovery,
{
    async fn lookup_ip(&self, family: AddressFamily, host: &str) -> Result<Vec<IpAddr>> {
        if host == DEFAULT_GATEWAY_HOST {
            let gateway = self.discover_gateway.discover()?;
            debug!(%gateway, "Resolved default gateway keyword");
            return self.inner.lookup_ip(family, &gateway.to_string()).await;
        }

        self.inner.lookup_ip(family, host).await
    }

    async fn lookup_port(&self, transport: Transport, service: &str) -> Result<u16> {
        self.inner.lookup_port(transport, service).await
    }
}

/// Gateway discovery from the kernel's IPv4 routing table.
pub struct RouteTableGateway {
    path: PathBuf,
}

impl RouteTableGateway {
    /// Read routes from a specific file in `/proc/net/route` format.
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Default for RouteTableGateway {
    fn default() -> Self {
        Self::with_path("/proc/net/route")
    }
}

impl GatewayDiscovery for RouteTableGateway {
    fn discover(&self) -> Result<IpAddr> {
        let contents = std::fs::read_to_string(&self.path)
            .map_err(|e| Error::gateway(format!("reading {}: {}", self.path.display(), e)))?;
        parse_route_table(&contents).map(IpAddr::V4)
    }
}

const RTF_UP: u32 = 0x0001;
const RTF_GATEWAY: u32 = 0x0002;

/// Pick the default route with the lowest metric from a `/proc/net/route` dump.
fn parse_route_table(contents: &str) -> Result<Ipv4Addr> {
    let mut best: Option<(u32, Ipv4Addr)> = None;

    // Columns: Iface Destination Gateway Flags RefCnt Use Metric Mask ...
    for line in contents.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 8 {
            continue;
        }
        let (Ok(dest), Ok(gateway), Ok(flags), Ok(metric), Ok(mask)) = (
            u32::from_str_radix(fields[1], 16),
            u32::from_str_radix(fields[2], 16),
            u32::from_str_radix(fields[3], 16),
            fields[6].parse::<u32>(),
            u32::from_str_radix(fields[7], 16),
        ) else {
            continue;
        };
        if dest != 0 || mask != 0 || flags & (RTF_UP | RTF_GATEWAY) != RTF_UP | RTF_GATEWAY {
            continue;
        }

        // The kernel prints the network-order address as a host-order word.
        let addr = Ipv4Addr::from(gateway.to_ne_bytes());
        if best.is_none_or(|(m, _)| metric < m) {
            best = Some((metric, addr));
        }
    }

    best.map(|(_, addr)| addr)
        .ok_or_else(|| Error::gateway("no default route with a gateway"))
}

/// Resolver backed by the system name service and services database.
pub struct SystemResolver {
    services_path: PathBuf,
}

impl SystemResolver {
    pub fn new() -> Self {
        Self::with_services_path("/etc/services")
    }

    /// Read service names from another file in `/etc/services` format.
    pub fn with_services_path(path: impl Into<PathBuf>) -> Self {
        Self {
            services_path: path.into(),
        }
    }
}

impl Default for SystemResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Resolver for SystemResolver {
    async fn lookup_ip(&self, family: AddressFamily, host: &str) -> Result<Vec<IpAddr>> {
        let resolved = tokio::net::lookup_host((host, 0))
            .await
            .map_err(|e| Error::resolve(format!("lookup {host}: {e}")))?;

        let mut addrs: Vec<IpAddr> = Vec::new();
        for addr in resolved.map(|sa| sa.ip()) {
            if family.admits(&addr) && !addrs.contains(&addr) {
                addrs.push(addr);
            }
        }
        if addrs.is_empty() {
            return Err(Error::resolve(format!("lookup {host}: no {family} addresses")));
        }
        Ok(addrs)
    }

    async fn lookup_port(&self, transport: Transport, service: &str) -> Result<u16> {
        if let Ok(port) = service.parse::<u16>() {
            return Ok(port);
        }

        if let Ok(contents) = tokio::fs::read_to_string(&self.services_path).await {
            if let Some(port) = parse_services(&contents, transport.protocol, service) {
                return Ok(port);
            }
        }

        well_known_port(service)
            .ok_or_else(|| Error::resolve(format!("unknown port {transport}/{service}")))
    }
}

/// Find a service in `/etc/services` format content.
fn parse_services(contents: &str, protocol: Protocol, service: &str) -> Option<u16> {
    for line in contents.lines() {
        let line = line.split('#').next().unwrap_or_default();
        let mut fields = line.split_whitespace();
        let (Some(name), Some(port_proto)) = (fields.next(), fields.next()) else {
            continue;
        };
        let Some((port, proto)) = port_proto.split_once('/') else {
            continue;
        };
        if proto != protocol.as_str() {
            continue;
        }
        if name == service || fields.any(|alias| alias == service) {
            if let Ok(port) = port.parse() {
                return Some(port);
            }
        }
    }
    None
}

/// Fallback for hosts without a services database.
const WELL_KNOWN_PORTS: &[(&str, u16)] = &[
    ("echo", 7),
    ("discard", 9),
    ("chargen", 19),
    ("ftp", 21),
    ("ssh", 22),
    ("telnet", 23),
    ("smtp", 25),
    ("domain", 53),
    ("http", 80),
    ("ntp", 123),
    ("https", 443),
];

fn well_known_port(service: &str) -> Option<u16> {
    WELL_KNOWN_PORTS
        .iter()
        .find(|(name, _)| *name == service)
        .map(|(_, port)| *port)
}
