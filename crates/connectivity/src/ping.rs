//! ICMP echo measurements over unprivileged datagram sockets.
//!
//! The blocking socket loop runs in `spawn_blocking` for precise timing.
//! Dropping the returned future raises a stop flag the loop polls, so a
//! cancelled check does not keep pinging until its timeout.

use crate::types::PingStats;
use common::{Error, Result};
use socket2::{Domain, Protocol, Socket, Type};
use std::io::ErrorKind;
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

const ICMP_ECHO_REQUEST: u8 = 8;
const ICMP_ECHO_REPLY: u8 = 0;
const ICMPV6_ECHO_REQUEST: u8 = 128;
const ICMPV6_ECHO_REPLY: u8 = 129;

/// Longest a single receive blocks before the stop flag is checked again.
const POLL_SLICE: Duration = Duration::from_millis(100);

/// Send `count` echo requests `interval` apart and collect the replies.
///
/// The whole run is bounded by `count × 10 × interval`. Unanswered
/// requests count as lost; only socket errors fail the measurement.
pub async fn ping(addr: IpAddr, count: u32, interval: Duration) -> Result<PingStats> {
    let timeout = interval * count.saturating_mul(10);
    let stop = Arc::new(AtomicBool::new(false));
    let _guard = StopOnDrop(stop.clone());

    tokio::task::spawn_blocking(move || run_blocking_ping(addr, count, interval, timeout, &stop))
        .await
        .map_err(|e| Error::measurement(format!("ping task failed: {e}")))?
}

struct StopOnDrop(Arc<AtomicBool>);

impl Drop for StopOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

fn run_blocking_ping(
    addr: IpAddr,
    count: u32,
    interval: Duration,
    timeout: Duration,
    stop: &AtomicBool,
) -> Result<PingStats> {
    let socket = open_socket(addr)?;
    let identifier: u16 = rand::random();

    let start = Instant::now();
    let deadline = start + timeout;
    let mut next_send = start;
    let mut sent_at: Vec<Instant> = Vec::with_capacity(count as usize);
    let mut answered = vec![false; count as usize];
    let mut rtts = Vec::with_capacity(count as usize);
    let mut buf = [0u8; 1500];

    loop {
        if stop.load(Ordering::Relaxed) {
            return Err(Error::measurement("ping cancelled"));
        }

        let now = Instant::now();
        let sent = sent_at.len() as u32;
        if now >= deadline || (sent == count && rtts.len() as u32 == count) {
            break;
        }

        if sent < count && now >= next_send {
            let packet = build_echo_request(addr, identifier, sent as u16);
            socket
                .send(&packet)
                .map_err(|e| Error::measurement(format!("sending echo request to {addr}: {e}")))?;
            sent_at.push(Instant::now());
            next_send += interval;
            continue;
        }

        let wake = if sent < count { next_send.min(deadline) } else { deadline };
        let wait = wake
            .saturating_duration_since(now)
            .clamp(Duration::from_millis(1), POLL_SLICE);
        socket
            .set_read_timeout(Some(wait))
            .map_err(|e| Error::measurement(format!("setting read timeout: {e}")))?;

        match socket.recv(&mut buf) {
            Ok(len) => {
                let received_at = Instant::now();
                let Some(seq) = parse_echo_reply(addr, &buf[..len]) else {
                    continue;
                };
                let seq = seq as usize;
                if seq < sent_at.len() && !answered[seq] {
                    answered[seq] = true;
                    rtts.push(received_at - sent_at[seq]);
                }
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(e) => {
                return Err(Error::measurement(format!("receiving echo reply from {addr}: {e}")));
            }
        }
    }

    let stats = PingStats::from_rtts(sent_at.len() as u32, &rtts);
    debug!(
        %addr,
        sent = stats.packets_sent,
        received = stats.packets_recv,
        avg_rtt_us = stats.avg_rtt.as_micros() as u64,
        "Ping finished"
    );
    Ok(stats)
}

fn open_socket(addr: IpAddr) -> Result<UdpSocket> {
    let (domain, protocol) = match addr {
        IpAddr::V4(_) => (Domain::IPV4, Protocol::ICMPV4),
        IpAddr::V6(_) => (Domain::IPV6, Protocol::ICMPV6),
    };

    let socket = Socket::new(domain, Type::DGRAM, Some(protocol))
        .map_err(|e| Error::measurement(format!("creating ICMP socket: {e}")))?;
    socket
        .connect(&SocketAddr::new(addr, 0).into())
        .map_err(|e| Error::measurement(format!("connecting ICMP socket to {addr}: {e}")))?;

    Ok(socket.into())
}

/// Build an echo request: 8 byte header and 56 byte payload.
fn build_echo_request(addr: IpAddr, identifier: u16, sequence: u16) -> Vec<u8> {
    let mut packet = vec![0u8; 64];

    packet[0] = match addr {
        IpAddr::V4(_) => ICMP_ECHO_REQUEST,
        IpAddr::V6(_) => ICMPV6_ECHO_REQUEST,
    };
    packet[4..6].copy_from_slice(&identifier.to_be_bytes());
    packet[6..8].copy_from_slice(&sequence.to_be_bytes());
    for (i, b) in packet[8..].iter_mut().enumerate() {
        *b = i as u8;
    }

    // The kernel fills in the ICMPv6 checksum.
    if addr.is_ipv4() {
        let checksum = icmp_checksum(&packet);
        packet[2..4].copy_from_slice(&checksum.to_be_bytes());
    }

    packet
}

/// Extract the sequence number of an echo reply.
///
/// Datagram ICMP sockets rewrite the identifier and only deliver replies
/// for their own socket, so the sequence number is the only key.
fn parse_echo_reply(addr: IpAddr, data: &[u8]) -> Option<u16> {
    let (reply_type, icmp) = match addr {
        IpAddr::V4(_) => {
            // Some platforms hand over the IP header as well.
            let offset = if data.first().is_some_and(|b| b >> 4 == 4) {
                usize::from(data[0] & 0x0f) * 4
            } else {
                0
            };
            (ICMP_ECHO_REPLY, data.get(offset..)?)
        }
        IpAddr::V6(_) => (ICMPV6_ECHO_REPLY, data),
    };

    if icmp.len() < 8 || icmp[0] != reply_type {
        return None;
    }
    Some(u16::from_be_bytes([icmp[6], icmp[7]]))
}

/// Compute the ICMP checksum (RFC 1071).
fn icmp_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = data
        .chunks(2)
        .map(|pair| match pair {
            [hi, lo] => u32::from(u16::from_be_bytes([*hi, *lo])),
            [hi] => u32::from(*hi) << 8,
            _ => 0,
        })
        .sum();

    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}
