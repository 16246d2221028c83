//! Outbound transport for encoded pose packets.

mod udp;

pub use udp::{
    parse_udp_target, TargetKind, UdpBroadcaster, UdpSinkConfig, DEFAULT_MULTICAST_TTL,
};

use crate::error::PipelineError;

/// Fire-and-forget datagram sink. One call sends one packet.
pub trait PacketSink: Send {
    /// Largest payload `send_packet` accepts.
    fn payload_limit(&self) -> usize;

    fn send_packet(&mut self, payload: &[u8]) -> Result<(), PipelineError>;
}
