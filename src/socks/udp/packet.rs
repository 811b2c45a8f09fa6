//! UDP packet encoding/decoding for SOCKS5
//!
//! Handles the encapsulation format for UDP packets in SOCKS5.
//!
//! Fragmentation is not implemented: a non-zero FRAG byte is accepted and
//! the datagram is forwarded as a whole, so multi-fragment exchanges may be
//! corrupted. Non-zero reserved bytes are tolerated the same way.

use crate::error::Socks5Error;
use crate::socks::consts::*;
use crate::socks::types::TargetAddr;
use bytes::{BufMut, BytesMut};
use std::net::{IpAddr, SocketAddr};

/// A decoded client datagram, borrowing its payload from the receive buffer
///
/// # UDP Request/Response Format
///
/// ```text
/// +----+------+------+----------+----------+----------+
/// |RSV | FRAG | ATYP | DST.ADDR | DST.PORT |   DATA   |
/// +----+------+------+----------+----------+----------+
/// | 2  |  1   |  1   | Variable |    2     | Variable |
/// +----+------+------+----------+----------+----------+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdpPacket<'a> {
    /// Reserved field as received
    pub reserved: u16,
    /// Fragment number (0 for standalone packets)
    pub frag: u8,
    /// Destination address
    pub target: TargetAddr,
    /// Packet data
    pub payload: &'a [u8],
}

impl UdpPacket<'_> {
    /// Check if this is a fragmented packet
    pub fn is_fragmented(&self) -> bool {
        self.frag != 0
    }
}

/// Parse a client datagram
///
/// Fails on a short header, a truncated address, an unknown ATYP or an
/// invalid domain; the caller drops such datagrams.
pub fn parse_udp_packet(data: &[u8]) -> Result<UdpPacket<'_>, Socks5Error> {
    if data.len() < UDP_HEADER_PREFIX_LEN {
        return Err(Socks5Error::Truncated {
            needed: UDP_HEADER_PREFIX_LEN,
            available: data.len(),
        });
    }

    let reserved = u16::from_be_bytes([data[0], data[1]]);
    let frag = data[2];
    let atyp = data[3];

    let rest = &data[UDP_HEADER_PREFIX_LEN..];
    let (target, consumed) = TargetAddr::decode(atyp, rest)?;

    Ok(UdpPacket {
        reserved,
        frag,
        target,
        payload: &rest[consumed..],
    })
}

/// Frame a datagram received from `source` for delivery to the client
///
/// The header always precedes the payload. IPv4 and IPv4-mapped sources
/// are tagged ATYP 0x01, other IPv6 sources 0x04.
pub fn encode_udp_reply(source: SocketAddr, payload: &[u8]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(UDP_MAX_REPLY_HEADER_LEN + payload.len());

    buf.put_u16(0);
    buf.put_u8(0);
    match source.ip().to_canonical() {
        IpAddr::V4(ip) => {
            buf.put_u8(SOCKS5_ADDR_TYPE_IPV4);
            buf.put_slice(&ip.octets());
        }
        IpAddr::V6(ip) => {
            buf.put_u8(SOCKS5_ADDR_TYPE_IPV6);
            buf.put_slice(&ip.octets());
        }
    }
    buf.put_u16(source.port());
    buf.put_slice(payload);

    buf
}
