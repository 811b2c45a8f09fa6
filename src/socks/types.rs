//! SOCKS5 type definitions
//!
//! Defines the core types used in SOCKS5 protocol handling, along with the
//! wire encoding of destination addresses.

use super::consts::*;
use crate::error::Socks5Error;
use anyhow::{Context, Result};
use bytes::{BufMut, BytesMut};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::io::{AsyncRead, AsyncReadExt};

/// SOCKS5 command types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocksCommand {
    /// TCP CONNECT - establish a TCP connection to target
    Connect,
    /// TCP BIND - wait for incoming connection (not implemented)
    Bind,
    /// UDP ASSOCIATE - establish UDP relay
    UdpAssociate,
}

impl SocksCommand {
    /// Parse a command byte into SocksCommand
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            SOCKS5_CMD_TCP_CONNECT => Some(SocksCommand::Connect),
            SOCKS5_CMD_TCP_BIND => Some(SocksCommand::Bind),
            SOCKS5_CMD_UDP_ASSOCIATE => Some(SocksCommand::UdpAssociate),
            _ => None,
        }
    }
}

impl fmt::Display for SocksCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocksCommand::Connect => write!(f, "CONNECT"),
            SocksCommand::Bind => write!(f, "BIND"),
            SocksCommand::UdpAssociate => write!(f, "UDP ASSOCIATE"),
        }
    }
}

/// Target address for SOCKS5 requests
///
/// Represents the destination address in a SOCKS5 request.
/// Can be an IP address (v4 or v6) or a domain name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TargetAddr {
    /// IP address with port
    Ip(SocketAddr),
    /// Domain name with port
    Domain(String, u16),
}

/// Fail closed unless `buf` holds at least `needed` bytes
fn ensure_len(buf: &[u8], needed: usize) -> Result<(), Socks5Error> {
    if buf.len() < needed {
        return Err(Socks5Error::Truncated {
            needed,
            available: buf.len(),
        });
    }
    Ok(())
}

impl TargetAddr {
    /// Create a new TargetAddr from an IPv4 address and port
    pub fn ipv4(ip: Ipv4Addr, port: u16) -> Self {
        TargetAddr::Ip(SocketAddr::new(IpAddr::V4(ip), port))
    }

    /// Create a new TargetAddr from an IPv6 address and port
    pub fn ipv6(ip: Ipv6Addr, port: u16) -> Self {
        TargetAddr::Ip(SocketAddr::new(IpAddr::V6(ip), port))
    }

    /// Create a new TargetAddr from a domain name and port
    pub fn domain(domain: String, port: u16) -> Self {
        TargetAddr::Domain(domain, port)
    }

    /// Get the port number
    pub fn port(&self) -> u16 {
        match self {
            TargetAddr::Ip(addr) => addr.port(),
            TargetAddr::Domain(_, port) => *port,
        }
    }

    /// Get the address type byte for SOCKS5 protocol
    pub fn addr_type(&self) -> u8 {
        match self {
            TargetAddr::Ip(SocketAddr::V4(_)) => SOCKS5_ADDR_TYPE_IPV4,
            TargetAddr::Ip(SocketAddr::V6(_)) => SOCKS5_ADDR_TYPE_IPV6,
            TargetAddr::Domain(_, _) => SOCKS5_ADDR_TYPE_DOMAIN,
        }
    }

    /// Number of bytes `write_to` emits, ATYP included
    pub fn wire_len(&self) -> usize {
        match self {
            TargetAddr::Ip(SocketAddr::V4(_)) => 1 + 4 + 2,
            TargetAddr::Ip(SocketAddr::V6(_)) => 1 + 16 + 2,
            TargetAddr::Domain(domain, _) => 1 + 1 + domain.len() + 2,
        }
    }

    /// Resolve the address to every candidate SocketAddr, in resolver order
    ///
    /// For IP addresses, this returns immediately with a single entry.
    /// For domain names, this performs DNS resolution; an empty answer is
    /// an error.
    pub async fn resolve_all(&self) -> Result<Vec<SocketAddr>> {
        match self {
            TargetAddr::Ip(addr) => Ok(vec![*addr]),
            TargetAddr::Domain(domain, port) => {
                let resolved: Vec<_> = tokio::net::lookup_host((domain.as_str(), *port))
                    .await
                    .with_context(|| format!("Failed to resolve domain: {}", domain))?
                    .collect();
                if resolved.is_empty() {
                    anyhow::bail!("No addresses found for domain: {}", domain);
                }
                Ok(resolved)
            }
        }
    }

    /// Decode `DST.ADDR` + `DST.PORT` for the given ATYP from the front of `buf`
    ///
    /// Returns the address and the number of bytes consumed. The type tag
    /// decides how many bytes are read; a buffer shorter than that is an
    /// error, never a partial address.
    pub fn decode(atyp: u8, buf: &[u8]) -> Result<(Self, usize), Socks5Error> {
        match atyp {
            SOCKS5_ADDR_TYPE_IPV4 => {
                ensure_len(buf, 4 + 2)?;
                let ip = Ipv4Addr::new(buf[0], buf[1], buf[2], buf[3]);
                let port = u16::from_be_bytes([buf[4], buf[5]]);
                Ok((TargetAddr::ipv4(ip, port), 6))
            }

            SOCKS5_ADDR_TYPE_DOMAIN => {
                ensure_len(buf, 1)?;
                let len = buf[0] as usize;
                if len == 0 {
                    return Err(Socks5Error::InvalidDomain("empty domain".to_string()));
                }
                ensure_len(buf, 1 + len + 2)?;
                let domain = std::str::from_utf8(&buf[1..1 + len])
                    .map_err(|_| Socks5Error::InvalidDomain("non UTF-8 domain".to_string()))?
                    .to_string();
                let port = u16::from_be_bytes([buf[1 + len], buf[2 + len]]);
                Ok((TargetAddr::domain(domain, port), 1 + len + 2))
            }

            SOCKS5_ADDR_TYPE_IPV6 => {
                ensure_len(buf, 16 + 2)?;
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&buf[..16]);
                let port = u16::from_be_bytes([buf[16], buf[17]]);
                Ok((TargetAddr::ipv6(Ipv6Addr::from(octets), port), 18))
            }

            other => Err(Socks5Error::AddressTypeNotSupported(other)),
        }
    }

    /// Read `DST.ADDR` + `DST.PORT` for the given ATYP from a stream
    pub async fn read_from<S>(stream: &mut S, atyp: u8) -> Result<Self>
    where
        S: AsyncRead + Unpin,
    {
        let mut buf = match atyp {
            SOCKS5_ADDR_TYPE_IPV4 => vec![0u8; 4 + 2],
            SOCKS5_ADDR_TYPE_IPV6 => vec![0u8; 16 + 2],
            SOCKS5_ADDR_TYPE_DOMAIN => {
                let len = stream
                    .read_u8()
                    .await
                    .with_context(|| "Failed to read domain length")?;
                let mut buf = vec![0u8; 1 + len as usize + 2];
                buf[0] = len;
                stream
                    .read_exact(&mut buf[1..])
                    .await
                    .with_context(|| "Failed to read domain address")?;
                let (addr, _) = Self::decode(atyp, &buf)?;
                return Ok(addr);
            }
            other => return Err(Socks5Error::AddressTypeNotSupported(other).into()),
        };

        stream
            .read_exact(&mut buf)
            .await
            .with_context(|| "Failed to read destination address")?;
        let (addr, _) = Self::decode(atyp, &buf)?;
        Ok(addr)
    }

    /// Append ATYP + address + port to `buf`
    pub fn write_to(&self, buf: &mut BytesMut) {
        buf.reserve(self.wire_len());
        match self {
            TargetAddr::Ip(SocketAddr::V4(addr)) => {
                buf.put_u8(SOCKS5_ADDR_TYPE_IPV4);
                buf.put_slice(&addr.ip().octets());
                buf.put_u16(addr.port());
            }
            TargetAddr::Ip(SocketAddr::V6(addr)) => {
                buf.put_u8(SOCKS5_ADDR_TYPE_IPV6);
                buf.put_slice(&addr.ip().octets());
                buf.put_u16(addr.port());
            }
            TargetAddr::Domain(domain, port) => {
                buf.put_u8(SOCKS5_ADDR_TYPE_DOMAIN);
                buf.put_u8(domain.len() as u8);
                buf.put_slice(domain.as_bytes());
                buf.put_u16(*port);
            }
        }
    }

}

impl fmt::Display for TargetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetAddr::Ip(addr) => write!(f, "{}", addr),
            TargetAddr::Domain(domain, port) => write!(f, "{}:{}", domain, port),
        }
    }
}

impl From<SocketAddr> for TargetAddr {
    fn from(addr: SocketAddr) -> Self {
        TargetAddr::Ip(addr)
    }
}

impl Default for TargetAddr {
    fn default() -> Self {
        TargetAddr::Ip(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0))
    }
}
