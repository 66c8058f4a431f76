//! Connectivity check types.

use common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

/// Kind of connectivity check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
#[repr(u8)]
pub enum CheckKind {
    /// Sends a few pings and determines the RTT. No packet loss figure
    /// is reported.
    HostPing = 1,

    /// Sends many pings (quickly) and determines both RTT and packet
    /// loss accurately.
    HostFloodPing = 2,

    /// Performs a connect on a stream socket and reports how long the
    /// handshake took.
    Connect = 3,

    /// Runs an echo test over a stream socket and reports data transfer
    /// speed. Requires an echo server on the other end.
    Transfer = 4,
}

impl CheckKind {
    /// All kinds, in code order.
    pub const ALL: [CheckKind; 4] = [
        CheckKind::HostPing,
        CheckKind::HostFloodPing,
        CheckKind::Connect,
        CheckKind::Transfer,
    ];

    /// Token used in flags, request parameters and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckKind::HostPing => "ping",
            CheckKind::HostFloodPing => "flood",
            CheckKind::Connect => "connect",
            CheckKind::Transfer => "transfer",
        }
    }

    /// Token for a numeric kind code. Unknown codes render as `unknown(N)`.
    pub fn name_for_code(code: u8) -> Cow<'static, str> {
        match CheckKind::try_from(code) {
            Ok(kind) => Cow::Borrowed(kind.as_str()),
            Err(_) => Cow::Owned(format!("unknown({code})")),
        }
    }

    /// Whether the check is an ICMP ping of some sort.
    pub fn is_ping(&self) -> bool {
        matches!(self, CheckKind::HostPing | CheckKind::HostFloodPing)
    }

    /// Whether the check needs a transport port (service).
    pub fn requires_service(&self) -> bool {
        !self.is_ping()
    }
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ping" => Ok(CheckKind::HostPing),
            "flood" => Ok(CheckKind::HostFloodPing),
            "connect" => Ok(CheckKind::Connect),
            "transfer" => Ok(CheckKind::Transfer),
            _ => Err(Error::UnknownKind(s.to_string())),
        }
    }
}

impl TryFrom<String> for CheckKind {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<CheckKind> for String {
    fn from(kind: CheckKind) -> Self {
        kind.as_str().to_string()
    }
}

impl TryFrom<u8> for CheckKind {
    type Error = Error;

    fn try_from(code: u8) -> Result<Self> {
        CheckKind::ALL
            .into_iter()
            .find(|kind| *kind as u8 == code)
            .ok_or_else(|| Error::UnknownKind(format!("unknown({code})")))
    }
}

/// Logical address family selector
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AddressFamily {
    /// Either family; the resolver picks.
    #[default]
    Ip,
    /// IPv4 only
    Ip4,
    /// IPv6 only
    Ip6,
}

impl AddressFamily {
    /// Token used in configuration and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            AddressFamily::Ip => "ip",
            AddressFamily::Ip4 => "ip4",
            AddressFamily::Ip6 => "ip6",
        }
    }

    /// Concrete family of an address. IPv4-mapped IPv6 addresses count as IPv4.
    pub fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => AddressFamily::Ip4,
            IpAddr::V6(v6) if v6.to_ipv4_mapped().is_some() => AddressFamily::Ip4,
            IpAddr::V6(_) => AddressFamily::Ip6,
        }
    }

    /// Whether an address is acceptable under this selector.
    pub fn admits(&self, addr: &IpAddr) -> bool {
        match self {
            AddressFamily::Ip => true,
            pinned => AddressFamily::of(addr) == *pinned,
        }
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AddressFamily {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ip" => Ok(AddressFamily::Ip),
            "ip4" => Ok(AddressFamily::Ip4),
            "ip6" => Ok(AddressFamily::Ip6),
            _ => Err(Error::config(format!("unknown address family: {s}"))),
        }
    }
}

impl TryFrom<String> for AddressFamily {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<AddressFamily> for String {
    fn from(af: AddressFamily) -> Self {
        af.as_str().to_string()
    }
}

/// Transport-layer protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Udp,
    Tcp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Udp => "udp",
            Protocol::Tcp => "tcp",
        }
    }
}

/// Transport used for port lookups, e.g. `tcp4` or `udp`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Transport {
    pub protocol: Protocol,
    pub family: AddressFamily,
}

impl Transport {
    /// Transport implied by a check: pings are datagram based, connect and
    /// transfer are stream based. A pinned family carries over.
    pub fn for_check(family: AddressFamily, kind: CheckKind) -> Self {
        let protocol = match kind {
            CheckKind::HostPing | CheckKind::HostFloodPing => Protocol::Udp,
            CheckKind::Connect | CheckKind::Transfer => Protocol::Tcp,
        };
        Self { protocol, family }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.protocol.as_str())?;
        match self.family {
            AddressFamily::Ip => Ok(()),
            AddressFamily::Ip4 => f.write_str("4"),
            AddressFamily::Ip6 => f.write_str("6"),
        }
    }
}

/// A single check against a host, or a service on a host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectivityCheck {
    /// What to measure
    pub kind: CheckKind,

    /// Address family hint
    #[serde(rename = "af", default)]
    pub network: AddressFamily,

    /// Host name, literal address or `default-gateway.internal`
    pub host: String,

    /// Port name or number. Required for connect and transfer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,

    /// Repeat period for scheduled checks. Unused for on-demand checks.
    #[serde(with = "humantime_serde", default)]
    pub interval: Duration,
}

impl ConnectivityCheck {
    /// Parse a scheduled check from the `key=value[,...]` flag syntax.
    ///
    /// Recognized keys are `kind`, `af`, `host`, `service` and `interval`.
    /// `af` defaults to `ip`.
    pub fn from_flag(s: &str) -> Result<Self> {
        let mut kind: Option<CheckKind> = None;
        let mut network = AddressFamily::Ip;
        let mut host = String::new();
        let mut service = None;
        let mut interval = Duration::ZERO;

        for kv in s.split(',') {
            let Some((key, value)) = kv.split_once('=') else {
                return Err(Error::config(format!(
                    "expected key=value[,...] in check flag, got {s:?}"
                )));
            };
            match key {
                "kind" => kind = Some(value.parse()?),
                "af" => network = value.parse()?,
                "host" => host = value.to_string(),
                "service" => service = Some(value.to_string()),
                "interval" => {
                    interval = humantime::parse_duration(value).map_err(|e| {
                        Error::config(format!("invalid interval {value:?}: {e}"))
                    })?
                }
                _ => {
                    return Err(Error::config(format!(
                        "unexpected key in check flag: {key}"
                    )));
                }
            }
        }

        let Some(kind) = kind else {
            return Err(Error::config(format!("missing kind parameter: {s}")));
        };
        let check = Self {
            kind,
            network,
            host,
            service: service.filter(|s: &String| !s.is_empty()),
            interval,
        };
        check.validate_with_context(s)?;
        Ok(check)
    }

    /// Build a one-off check from probe request parameters.
    ///
    /// `af` defaults to `ip`. The interval is left at zero.
    pub fn on_demand(
        kind: &str,
        af: Option<&str>,
        target: Option<&str>,
        service: Option<&str>,
    ) -> Result<Self> {
        let kind: CheckKind = kind.parse()?;
        let network = match af {
            None | Some("") => AddressFamily::Ip,
            Some(af) => af.parse()?,
        };
        let host = match target {
            Some(target) if !target.is_empty() => target.to_string(),
            _ => return Err(Error::config("missing target parameter")),
        };
        let service = service.filter(|s| !s.is_empty()).map(str::to_string);
        if service.is_none() && kind.requires_service() {
            return Err(Error::config("missing service parameter"));
        }

        Ok(Self {
            kind,
            network,
            host,
            service,
            interval: Duration::ZERO,
        })
    }

    /// Validate a check that will be run by the scheduler.
    pub fn validate_scheduled(&self) -> Result<()> {
        self.validate_with_context(&self.to_string())
    }

    /// Validate a check run at scrape time, which needs no interval.
    pub fn validate_target(&self) -> Result<()> {
        self.validate_target_with_context(&self.to_string())
    }

    fn validate_with_context(&self, context: &str) -> Result<()> {
        self.validate_target_with_context(context)?;
        if self.interval.is_zero() {
            return Err(Error::config(format!("missing interval parameter: {context}")));
        }
        Ok(())
    }

    fn validate_target_with_context(&self, context: &str) -> Result<()> {
        if self.host.is_empty() {
            return Err(Error::config(format!("missing host parameter: {context}")));
        }
        if self.service().is_none() && self.kind.requires_service() {
            return Err(Error::config(format!("missing service parameter: {context}")));
        }
        Ok(())
    }

    /// Configured service, if any.
    pub fn service(&self) -> Option<&str> {
        self.service.as_deref().filter(|s| !s.is_empty())
    }

    /// Service as used in metric labels; empty for pings.
    pub fn service_label(&self) -> &str {
        self.service().unwrap_or("")
    }
}

impl fmt::Display for ConnectivityCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "kind={},af={},host={}", self.kind, self.network, self.host)?;
        if let Some(service) = self.service() {
            write!(f, ",service={service}")?;
        }
        if !self.interval.is_zero() {
            write!(f, ",interval={}", humantime::format_duration(self.interval))?;
        }
        Ok(())
    }
}

/// Aggregate ping statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PingStats {
    /// Echo requests sent
    pub packets_sent: u32,

    /// Matching echo replies received
    pub packets_recv: u32,

    /// Average round-trip time over the received replies
    pub avg_rtt: Duration,

    /// Fraction of requests without a reply, 0.0..=1.0
    pub packet_loss: f64,
}

impl PingStats {
    /// Compute statistics from the number sent and the RTTs of the replies.
    pub fn from_rtts(packets_sent: u32, rtts: &[Duration]) -> Self {
        let packets_recv = rtts.len() as u32;
        let avg_rtt = if rtts.is_empty() {
            Duration::ZERO
        } else {
            rtts.iter().sum::<Duration>() / packets_recv
        };
        let packet_loss = if packets_sent == 0 {
            0.0
        } else {
            f64::from(packets_sent - packets_recv.min(packets_sent)) / f64::from(packets_sent)
        };

        Self {
            packets_sent,
            packets_recv,
            avg_rtt,
            packet_loss,
        }
    }
}

/// Result of a stream transfer measurement
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferStats {
    /// Bytes read back from the peer
    pub bytes: u64,

    /// Time spent transferring, excluding the dial
    pub duration: Duration,

    /// Time spent establishing the connection
    pub dial_duration: Duration,
}
