//! Measurement primitives.

use crate::ping;
use crate::resolver::Resolver;
use crate::types::{AddressFamily, PingStats, TransferStats};
use async_trait::async_trait;
use common::{Error, Result};
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Network measurement capability the dispatcher runs checks against.
///
/// Addresses are already resolved; `family` is the effective family of
/// `addr` and is informational.
#[async_trait]
pub trait Checker: Send + Sync {
    /// Send ICMP echo requests. `flood` selects the high-rate variant.
    async fn ping(&self, family: AddressFamily, addr: IpAddr, flood: bool) -> Result<PingStats>;

    /// Time a TCP handshake.
    async fn connect(&self, family: AddressFamily, addr: IpAddr, port: u16) -> Result<Duration>;

    /// Push a payload through a stream echo service and read it back.
    async fn transfer(
        &self,
        family: AddressFamily,
        addr: IpAddr,
        port: u16,
    ) -> Result<TransferStats>;

    /// Resolver used for host and service lookups before measuring.
    fn resolver(&self) -> &dyn Resolver;
}

/// Tunables for [`NetChecker`]
#[derive(Debug, Clone)]
pub struct MeasurementSettings {
    pub ping_count: u32,
    pub ping_interval: Duration,
    pub flood_count: u32,
    pub flood_interval: Duration,
    pub connect_timeout: Duration,
    pub transfer_timeout: Duration,
    pub transfer_size: usize,
}

impl Default for MeasurementSettings {
    fn default() -> Self {
        Self {
            ping_count: 3,
            ping_interval: Duration::from_secs(1),
            flood_count: 200,
            flood_interval: Duration::from_millis(10),
            connect_timeout: Duration::from_secs(10),
            transfer_timeout: Duration::from_secs(30),
            transfer_size: 1 << 20,
        }
    }
}

/// Checker measuring over the real network
pub struct NetChecker<R> {
    resolver: R,
    settings: MeasurementSettings,
}

impl<R: Resolver> NetChecker<R> {
    pub fn new(resolver: R, settings: MeasurementSettings) -> Self {
        Self { resolver, settings }
    }

    pub fn settings(&self) -> &MeasurementSettings {
        &self.settings
    }

    async fn dial(&self, target: SocketAddr) -> Result<(TcpStream, Duration)> {
        let start = Instant::now();
        match timeout(self.settings.connect_timeout, TcpStream::connect(target)).await {
            Ok(Ok(stream)) => Ok((stream, start.elapsed())),
            Ok(Err(e)) => {
                warn!(%target, error = %e, "TCP connect failed");
                Err(Error::measurement(format!("connecting to {target}: {e}")))
            }
            Err(_) => {
                warn!(%target, "TCP connect timed out");
                Err(Error::Timeout(self.settings.connect_timeout))
            }
        }
    }
}

#[async_trait]
impl<R: Resolver> Checker for NetChecker<R> {
    async fn ping(&self, family: AddressFamily, addr: IpAddr, flood: bool) -> Result<PingStats> {
        let (count, interval) = if flood {
            (self.settings.flood_count, self.settings.flood_interval)
        } else {
            (self.settings.ping_count, self.settings.ping_interval)
        };
        debug!(%family, %addr, count, flood, "Pinging");
        ping::ping(addr, count, interval).await
    }

    async fn connect(&self, family: AddressFamily, addr: IpAddr, port: u16) -> Result<Duration> {
        let target = SocketAddr::new(addr, port);
        let (_stream, elapsed) = self.dial(target).await?;
        debug!(%family, %target, duration_ms = elapsed.as_millis(), "TCP connect successful");
        Ok(elapsed)
    }

    async fn transfer(
        &self,
        family: AddressFamily,
        addr: IpAddr,
        port: u16,
    ) -> Result<TransferStats> {
        let target = SocketAddr::new(addr, port);
        let (stream, dial_duration) = self.dial(target).await?;

        let start = Instant::now();
        let (mut reader, mut writer) = stream.into_split();
        let payload = vec![0u8; self.settings.transfer_size];

        let write = async move {
            writer.write_all(&payload).await?;
            writer.shutdown().await
        };
        let read = async move { tokio::io::copy(&mut reader, &mut tokio::io::sink()).await };

        let bytes = match timeout(self.settings.transfer_timeout, async {
            tokio::try_join!(write, read)
        })
        .await
        {
            Ok(Ok(((), bytes))) => bytes,
            Ok(Err(e)) => {
                warn!(%target, error = %e, "Transfer failed");
                return Err(Error::measurement(format!("transfer with {target}: {e}")));
            }
            Err(_) => {
                warn!(%target, "Transfer timed out");
                return Err(Error::Timeout(self.settings.transfer_timeout));
            }
        };

        let duration = start.elapsed();
        debug!(
            %family,
            %target,
            bytes,
            dial_ms = dial_duration.as_millis(),
            duration_ms = duration.as_millis(),
            "Transfer successful"
        );
        Ok(TransferStats {
            bytes,
            duration,
            dial_duration,
        })
    }

    fn resolver(&self) -> &dyn Resolver {
        &self.resolver
    }
}
