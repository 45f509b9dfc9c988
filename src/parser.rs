// src/parser.rs
//! Zero-copy Ethernet/IPv4/IPv6 5-tuple extraction (spec §4.3, component 4:
//! `Parser`).
//!
//! All multi-byte reads are byte-wise (never an aligned wide load) because
//! frames may begin at odd offsets in a [`crate::buffer::PacketBuffer`]'s
//! backing array (spec §9 "IPv6 on unaligned offsets").

use std::fmt;

const ETHERNET_HEADER_LEN: usize = 14;
const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_IPV6: u16 = 0x86DD;
/// EtherType for ARP, used by the worker's control-plane snoop (spec §4.7a).
pub const ETHERTYPE_ARP: u16 = 0x0806;

const IPV4_MIN_HEADER_LEN: usize = 20;
const IPV6_HEADER_LEN: usize = 40;

const PROTO_ICMP: u8 = 1;
const PROTO_TCP: u8 = 6;
const PROTO_UDP: u8 = 17;
/// Next-header value for ICMPv6, used by the worker's NDP snoop (spec
/// §4.7a).
pub const PROTO_ICMPV6: u8 = 58;

/// Why a frame could not be reduced to a [`FlowKey`] (spec §4.3/§7
/// `ParseError`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// Fewer than 14 bytes — no complete Ethernet header.
    TruncatedEthernet,
    /// EtherType is not `0x0800` (IPv4) or `0x86DD` (IPv6).
    UnsupportedEtherType(u16),
    /// IPv4 header present but `version != 4` or truncated before IHL.
    InvalidIpv4Header,
    /// IPv6 header shorter than the fixed 40 bytes.
    TruncatedIpv6Header,
    /// L4 payload shorter than the minimum for its protocol.
    TruncatedL4,
    /// TCP data offset is out of range for the remaining bytes.
    InvalidTcpHeader,
    /// L3 protocol number has no L4 mapping (anything but
    /// TCP/UDP/ICMP/ICMPv6).
    UnsupportedProtocol(u8),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TruncatedEthernet => write!(f, "frame shorter than an Ethernet header"),
            Self::UnsupportedEtherType(et) => write!(f, "unsupported ethertype 0x{et:04x}"),
            Self::InvalidIpv4Header => write!(f, "invalid or truncated IPv4 header"),
            Self::TruncatedIpv6Header => write!(f, "truncated IPv6 header"),
            Self::TruncatedL4 => write!(f, "truncated L4 header"),
            Self::InvalidTcpHeader => write!(f, "invalid TCP data offset"),
            Self::UnsupportedProtocol(p) => write!(f, "unsupported L4 protocol {p}"),
        }
    }
}

impl std::error::Error for ParseError {}

/// Either an IPv4 (4-byte) or IPv6 (16-byte) address, stored as raw bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpAddrBytes {
    /// IPv4, host-order 32-bit value held as big-endian bytes in storage but
    /// exposed as a `u32` for arithmetic (masking, hashing).
    V4([u8; 4]),
    /// IPv6, 16 raw address bytes.
    V6([u8; 16]),
}

impl IpAddrBytes {
    /// Raw bytes, network order.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::V4(b) => b,
            Self::V6(b) => b,
        }
    }
}

/// The 5-tuple (plus IP version) a [`crate::rule::RuleTable`] matches
/// against and a [`crate::hash::flow_hash`] digests (spec §3 `FlowKey`).
///
/// For ICMP/ICMPv6, `src_port` carries the 16-bit identifier and `dst_port`
/// carries `(type << 8) | code`, per spec §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowKey {
    /// `4` or `6`.
    pub ip_ver: u8,
    /// Source address, 4 or 16 bytes matching `ip_ver`.
    pub src_addr: IpAddrBytes,
    /// Destination address, 4 or 16 bytes matching `ip_ver`.
    pub dst_addr: IpAddrBytes,
    /// Source port, or ICMP identifier.
    pub src_port: u16,
    /// Destination port, or ICMP `(type << 8) | code`.
    pub dst_port: u16,
    /// IP protocol / next-header number (6 = TCP, 17 = UDP, 1/58 = ICMP/ICMPv6).
    pub protocol: u8,
}

impl FlowKey {
    /// Swaps source and destination address/port — used to verify
    /// [`crate::hash::flow_hash`] symmetry (spec §8 "FlowHash symmetry").
    pub fn swapped(&self) -> Self {
        Self {
            ip_ver: self.ip_ver,
            src_addr: self.dst_addr,
            dst_addr: self.src_addr,
            src_port: self.dst_port,
            dst_port: self.src_port,
            protocol: self.protocol,
        }
    }
}

#[inline]
fn be16(b: &[u8]) -> u16 {
    u16::from_be_bytes([b[0], b[1]])
}

/// Extracts the EtherType from a frame without requiring L3 parsing — used
/// by the worker's control-plane snoop (spec §4.7a) before deciding whether
/// to hand the frame to [`parse`].
pub fn ether_type(frame: &[u8]) -> Result<u16, ParseError> {
    if frame.len() < ETHERNET_HEADER_LEN {
        return Err(ParseError::TruncatedEthernet);
    }
    Ok(be16(&frame[12..14]))
}

/// Parses an Ethernet-framed IPv4/IPv6 packet into a [`FlowKey`].
///
/// Dispatch and field layout exactly follow spec §4.3. Reads are byte-wise
/// throughout (no aligned wide loads), so `frame` may start at any offset in
/// its backing storage (spec §9).
pub fn parse(frame: &[u8]) -> Result<FlowKey, ParseError> {
    let ethertype = ether_type(frame)?;
    match ethertype {
        ETHERTYPE_IPV4 => parse_ipv4(&frame[ETHERNET_HEADER_LEN..]),
        ETHERTYPE_IPV6 => parse_ipv6(&frame[ETHERNET_HEADER_LEN..]),
        other => Err(ParseError::UnsupportedEtherType(other)),
    }
}

fn parse_ipv4(ip: &[u8]) -> Result<FlowKey, ParseError> {
    if ip.len() < IPV4_MIN_HEADER_LEN {
        return Err(ParseError::InvalidIpv4Header);
    }
    let version = ip[0] >> 4;
    let ihl = (ip[0] & 0x0F) as usize * 4;
    if version != 4 || ihl < IPV4_MIN_HEADER_LEN || ip.len() < ihl {
        return Err(ParseError::InvalidIpv4Header);
    }
    let protocol = ip[9];
    let src_addr = IpAddrBytes::V4([ip[12], ip[13], ip[14], ip[15]]);
    let dst_addr = IpAddrBytes::V4([ip[16], ip[17], ip[18], ip[19]]);
    let l4 = &ip[ihl..];
    let (src_port, dst_port) = l4_ports(protocol, l4)?;
    Ok(FlowKey {
        ip_ver: 4,
        src_addr,
        dst_addr,
        src_port,
        dst_port,
        protocol,
    })
}

fn parse_ipv6(ip: &[u8]) -> Result<FlowKey, ParseError> {
    if ip.len() < IPV6_HEADER_LEN {
        return Err(ParseError::TruncatedIpv6Header);
    }
    let protocol = ip[6]; // next_header
    let mut src = [0u8; 16];
    let mut dst = [0u8; 16];
    src.copy_from_slice(&ip[8..24]);
    dst.copy_from_slice(&ip[24..40]);
    let l4 = &ip[IPV6_HEADER_LEN..];
    let (src_port, dst_port) = l4_ports(protocol, l4)?;
    Ok(FlowKey {
        ip_ver: 6,
        src_addr: IpAddrBytes::V6(src),
        dst_addr: IpAddrBytes::V6(dst),
        src_port,
        dst_port,
        protocol,
    })
}

fn l4_ports(protocol: u8, l4: &[u8]) -> Result<(u16, u16), ParseError> {
    match protocol {
        PROTO_UDP => {
            if l4.len() < 8 {
                return Err(ParseError::TruncatedL4);
            }
            Ok((be16(&l4[0..2]), be16(&l4[2..4])))
        }
        PROTO_TCP => {
            if l4.len() < IPV4_MIN_HEADER_LEN {
                return Err(ParseError::TruncatedL4);
            }
            let data_offset = ((l4[12] >> 4) as usize) * 4;
            if data_offset < IPV4_MIN_HEADER_LEN || data_offset > l4.len() {
                return Err(ParseError::InvalidTcpHeader);
            }
            Ok((be16(&l4[0..2]), be16(&l4[2..4])))
        }
        PROTO_ICMP | PROTO_ICMPV6 => {
            if l4.len() < 8 {
                return Err(ParseError::TruncatedL4);
            }
            let icmp_type = l4[0];
            let code = l4[1];
            let identifier = be16(&l4[4..6]);
            let dst_port = ((icmp_type as u16) << 8) | (code as u16);
            Ok((identifier, dst_port))
        }
        other => Err(ParseError::UnsupportedProtocol(other)),
    }
}
