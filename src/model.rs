//! Flow event data model shared by the capture and simulation threads.

use std::net::{IpAddr, Ipv4Addr};

/// Transport protocol tag of a parsed packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
    Other,
}

impl Protocol {
    pub const COUNT: usize = 4;

    pub fn index(self) -> usize {
        match self {
            Protocol::Tcp => 0,
            Protocol::Udp => 1,
            Protocol::Icmp => 2,
            Protocol::Other => 3,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
            Protocol::Icmp => "ICMP",
            Protocol::Other => "OTHER",
        }
    }
}

/// One parsed packet's flow identity.
///
/// Events live in pre-allocated ring slots and are overwritten in place, never
/// destroyed. `wire_len` is the true on-wire size reported by the capture
/// layer, not the length of the (possibly truncated) capture buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowEvent {
    pub src: IpAddr,
    pub src_port: u16,
    pub dst: IpAddr,
    pub dst_port: u16,
    pub proto: Protocol,
    pub wire_len: u32,
    /// Capture timestamp, milliseconds since the Unix epoch.
    pub ts_millis: u64,
}

impl Default for FlowEvent {
    fn default() -> Self {
        FlowEvent {
            src: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            src_port: 0,
            dst: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            dst_port: 0,
            proto: Protocol::Other,
            wire_len: 0,
            ts_millis: 0,
        }
    }
}
