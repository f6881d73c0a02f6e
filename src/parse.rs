//! Zero-copy flow extraction from raw link-layer frames.
//!
//! Works directly on the captured byte slice at fixed offsets; no per-packet
//! decoder objects. Frames that are too short, non-IP, or truncated before
//! the transport ports simply produce no record.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::model::Protocol;

const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_IPV6: u16 = 0x86DD;

const ETH_HEADER_LEN: usize = 14;
const IPV6_HEADER_LEN: usize = 40;

/// Ethernet + minimal IPv4 header.
const MIN_IPV4_FRAME: usize = 34;
/// Ethernet + fixed IPv6 header + 4 bytes of transport ports.
const MIN_IPV6_FRAME: usize = 58;

/// Flow identity of one parsed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowRecord {
    pub src: IpAddr,
    pub src_port: u16,
    pub dst: IpAddr,
    pub dst_port: u16,
    pub proto: Protocol,
    pub wire_len: u32,
}

/// Parses one raw frame into a flow record.
///
/// `wire_len` is the true on-wire packet size reported by the capture layer;
/// the frame slice itself may be truncated to the snap length. Returns `None`
/// for anything that is not a parseable IPv4/IPv6 packet.
///
/// Limitation: IPv6 extension headers are not walked. A packet carrying them
/// has its ports read from the wrong offset.
pub fn parse_frame(frame: &[u8], wire_len: u32) -> Option<FlowRecord> {
    if frame.len() < MIN_IPV4_FRAME {
        return None;
    }
    let ether_type = u16::from_be_bytes([frame[12], frame[13]]);
    match ether_type {
        ETHERTYPE_IPV4 => parse_ipv4(frame, wire_len),
        ETHERTYPE_IPV6 => parse_ipv6(frame, wire_len),
        _ => None,
    }
}

fn transport_protocol(byte: u8) -> Protocol {
    match byte {
        6 => Protocol::Tcp,
        17 => Protocol::Udp,
        _ => Protocol::Other,
    }
}

fn read_port(frame: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([frame[offset], frame[offset + 1]])
}

fn parse_ipv4(frame: &[u8], wire_len: u32) -> Option<FlowRecord> {
    let proto = transport_protocol(frame[23]);
    let src: [u8; 4] = frame[26..30].try_into().ok()?;
    let dst: [u8; 4] = frame[30..34].try_into().ok()?;

    // Header length from the low nibble of the first IP byte locates the
    // transport header past any IPv4 options.
    let ihl = ((frame[14] & 0x0f) as usize) * 4;
    let transport = ETH_HEADER_LEN + ihl;
    if frame.len() < transport + 4 {
        return None;
    }

    Some(FlowRecord {
        src: IpAddr::V4(Ipv4Addr::from(src)),
        src_port: read_port(frame, transport),
        dst: IpAddr::V4(Ipv4Addr::from(dst)),
        dst_port: read_port(frame, transport + 2),
        proto,
        wire_len,
    })
}

fn parse_ipv6(frame: &[u8], wire_len: u32) -> Option<FlowRecord> {
    if frame.len() < MIN_IPV6_FRAME {
        return None;
    }
    // Next-header field sits at offset 6 of the fixed IPv6 header.
    let proto = transport_protocol(frame[20]);
    let src: [u8; 16] = frame[22..38].try_into().ok()?;
    let dst: [u8; 16] = frame[38..54].try_into().ok()?;
    let transport = ETH_HEADER_LEN + IPV6_HEADER_LEN;

    Some(FlowRecord {
        src: IpAddr::V6(Ipv6Addr::from(src)),
        src_port: read_port(frame, transport),
        dst: IpAddr::V6(Ipv6Addr::from(dst)),
        dst_port: read_port(frame, transport + 2),
        proto,
        wire_len,
    })
}
