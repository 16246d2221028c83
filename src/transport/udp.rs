//! UDP datagram sink for pose packets.
//!
//! Unicast, broadcast and multicast targets are all plain `UdpSocket::send_to`
//! calls; the difference is socket setup at open time.

use std::fmt;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs, UdpSocket};

use anyhow::{anyhow, Context, Result};

use super::PacketSink;
use crate::error::PipelineError;
use crate::wire::MAX_UDP_PAYLOAD;

/// Multicast TTL for published packets. One hop keeps them on the local segment.
pub const DEFAULT_MULTICAST_TTL: u32 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetKind {
    Unicast,
    Broadcast,
    Multicast,
}

impl TargetKind {
    /// Only the limited broadcast address is recognised here; a subnet broadcast
    /// address looks like any other host without the netmask.
    pub fn classify(addr: &SocketAddr) -> Self {
        match addr.ip() {
            IpAddr::V4(ip) if ip.is_multicast() => Self::Multicast,
            IpAddr::V4(ip) if ip.is_broadcast() => Self::Broadcast,
            IpAddr::V6(ip) if ip.is_multicast() => Self::Multicast,
            _ => Self::Unicast,
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unicast => write!(f, "unicast"),
            Self::Broadcast => write!(f, "broadcast"),
            Self::Multicast => write!(f, "multicast"),
        }
    }
}

/// Resolve `host:port` to a single socket address.
pub fn parse_udp_target(addr: &str) -> Result<SocketAddr> {
    let mut resolved = addr
        .to_socket_addrs()
        .with_context(|| format!("invalid UDP target '{}'", addr))?;
    resolved
        .next()
        .ok_or_else(|| anyhow!("UDP target '{}' did not resolve", addr))
}

#[derive(Clone, Debug)]
pub struct UdpSinkConfig {
    /// Local address to bind; selects the outgoing interface.
    pub bind: SocketAddr,
    pub target: SocketAddr,
    pub payload_limit: usize,
    pub multicast_ttl: u32,
    /// Deliver multicast packets to listeners on this host too.
    pub multicast_loop: bool,
    /// Treat the target as a (subnet) broadcast address and enable `SO_BROADCAST`.
    pub broadcast: bool,
}

impl UdpSinkConfig {
    pub fn new(target: SocketAddr) -> Self {
        let bind = match target {
            SocketAddr::V4(_) => SocketAddr::from(([0, 0, 0, 0], 0)),
            SocketAddr::V6(_) => SocketAddr::from(([0u16; 8], 0)),
        };
        Self {
            bind,
            target,
            payload_limit: MAX_UDP_PAYLOAD,
            multicast_ttl: DEFAULT_MULTICAST_TTL,
            multicast_loop: true,
            broadcast: false,
        }
    }
}

/// Owns the socket; lives on the broadcast thread.
#[derive(Debug)]
pub struct UdpBroadcaster {
    socket: UdpSocket,
    target: SocketAddr,
    kind: TargetKind,
    payload_limit: usize,
}

impl UdpBroadcaster {
    /// Bind and configure the socket. Any failure here is `ResourceUnavailable`.
    pub fn open(config: &UdpSinkConfig) -> Result<Self, PipelineError> {
        let unavailable = |what: &str, e: std::io::Error| {
            PipelineError::ResourceUnavailable(format!("udp {} ({}): {}", what, config.bind, e))
        };
        let socket = UdpSocket::bind(config.bind).map_err(|e| unavailable("bind", e))?;
        let kind = match TargetKind::classify(&config.target) {
            TargetKind::Unicast if config.broadcast && config.target.is_ipv4() => {
                TargetKind::Broadcast
            }
            kind => kind,
        };
        match (kind, config.target.ip()) {
            (TargetKind::Broadcast, _) => socket
                .set_broadcast(true)
                .map_err(|e| unavailable("SO_BROADCAST", e))?,
            (TargetKind::Multicast, IpAddr::V4(_)) => {
                socket
                    .set_multicast_ttl_v4(config.multicast_ttl)
                    .map_err(|e| unavailable("multicast ttl", e))?;
                socket
                    .set_multicast_loop_v4(config.multicast_loop)
                    .map_err(|e| unavailable("multicast loop", e))?;
            }
            (TargetKind::Multicast, IpAddr::V6(_)) => socket
                .set_multicast_loop_v6(config.multicast_loop)
                .map_err(|e| unavailable("multicast loop", e))?,
            (TargetKind::Unicast, _) => {}
        }

        log::info!(
            "udp {} sink {} -> {} (payload limit {} bytes)",
            kind,
            socket.local_addr().map(|a| a.to_string()).unwrap_or_default(),
            config.target,
            config.payload_limit
        );
        Ok(Self {
            socket,
            target: config.target,
            kind,
            payload_limit: config.payload_limit,
        })
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    pub fn kind(&self) -> TargetKind {
        self.kind
    }
}

impl PacketSink for UdpBroadcaster {
    fn payload_limit(&self) -> usize {
        self.payload_limit
    }

    fn send_packet(&mut self, payload: &[u8]) -> Result<(), PipelineError> {
        let sent = self
            .socket
            .send_to(payload, self.target)
            .map_err(PipelineError::TransmissionFailure)?;
        if sent != payload.len() {
            return Err(PipelineError::TransmissionFailure(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                format!("short send: {} of {} bytes", sent, payload.len()),
            )));
        }
        Ok(())
    }
}
