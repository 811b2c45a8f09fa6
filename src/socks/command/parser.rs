//! SOCKS5 request parser
//!
//! Parses the request frame that follows authentication.

use crate::error::Socks5Error;
use crate::socks::consts::*;
use crate::socks::types::{SocksCommand, TargetAddr};
use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt};

/// A decoded SOCKS5 request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Raw CMD byte as sent by the client
    pub command_byte: u8,
    /// Destination the client asked for
    pub target: TargetAddr,
}

impl Request {
    /// The command, if it is one this protocol defines
    pub fn command(&self) -> Option<SocksCommand> {
        SocksCommand::from_byte(self.command_byte)
    }
}

/// Parse a SOCKS5 request from the stream
///
/// # SOCKS5 Request Format
///
/// ```text
/// +----+-----+-------+------+----------+----------+
/// |VER | CMD |  RSV  | ATYP | DST.ADDR | DST.PORT |
/// +----+-----+-------+------+----------+----------+
/// | 1  |  1  | X'00' |  1   | Variable |    2     |
/// +----+-----+-------+------+----------+----------+
/// ```
///
/// The command byte is not interpreted here so that an unknown command
/// with a well-formed address can still be answered with a reply.
/// An unknown ATYP fails with `Socks5Error::AddressTypeNotSupported`.
pub async fn parse_request<S>(stream: &mut S) -> Result<Request>
where
    S: AsyncRead + Unpin,
{
    // Read: VER CMD RSV ATYP
    let mut header = [0u8; 4];
    stream
        .read_exact(&mut header)
        .await
        .with_context(|| "Failed to read request header")?;

    let version = header[0];
    let command_byte = header[1];
    let addr_type = header[3];

    if version != SOCKS5_VERSION {
        return Err(Socks5Error::UnsupportedVersion(version).into());
    }

    let target = TargetAddr::read_from(stream, addr_type).await?;

    tracing::debug!("Parsed SOCKS5 request: cmd={:#04x} to {}", command_byte, target);

    Ok(Request {
        command_byte,
        target,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::net::{IpAddr, Ipv4Addr};

    fn request_ipv4(cmd: u8, ip: [u8; 4], port: u16) -> Vec<u8> {
        let mut request = vec![SOCKS5_VERSION, cmd, SOCKS5_RESERVED, SOCKS5_ADDR_TYPE_IPV4];
        request.extend_from_slice(&ip);
        request.extend_from_slice(&port.to_be_bytes());
        request
    }

    fn request_domain(domain: &str, port: u16) -> Vec<u8> {
        let mut request = vec![
            SOCKS5_VERSION,
            SOCKS5_CMD_TCP_CONNECT,
            SOCKS5_RESERVED,
            SOCKS5_ADDR_TYPE_DOMAIN,
            domain.len() as u8,
        ];
        request.extend_from_slice(domain.as_bytes());
        request.extend_from_slice(&port.to_be_bytes());
        request
    }

    #[tokio::test]
    async fn test_parse_request_ipv4() {
        let mut cursor = Cursor::new(request_ipv4(SOCKS5_CMD_TCP_CONNECT, [192, 168, 1, 1], 8080));

        let request = parse_request(&mut cursor).await.unwrap();

        assert_eq!(request.command(), Some(SocksCommand::Connect));
        assert_eq!(
            request.target,
            TargetAddr::Ip((IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1)), 8080).into())
        );
    }

    #[tokio::test]
    async fn test_parse_request_domain() {
        let mut cursor = Cursor::new(request_domain("example.com", 443));

        let request = parse_request(&mut cursor).await.unwrap();

        assert_eq!(request.target, TargetAddr::domain("example.com".to_string(), 443));
    }

    #[tokio::test]
    async fn test_parse_request_ipv6() {
        let mut request = vec![
            SOCKS5_VERSION,
            SOCKS5_CMD_TCP_CONNECT,
            SOCKS5_RESERVED,
            SOCKS5_ADDR_TYPE_IPV6,
        ];
        request.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1]);
        request.extend_from_slice(&80u16.to_be_bytes());

        let parsed = parse_request(&mut Cursor::new(request)).await.unwrap();
        assert_eq!(parsed.target.to_string(), "[::1]:80");
    }

    #[tokio::test]
    async fn test_parse_request_invalid_version() {
        let mut request = request_ipv4(SOCKS5_CMD_TCP_CONNECT, [127, 0, 0, 1], 80);
        request[0] = 4;

        let err = parse_request(&mut Cursor::new(request)).await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<Socks5Error>(),
            Some(&Socks5Error::UnsupportedVersion(4))
        );
    }

    #[tokio::test]
    async fn test_parse_request_keeps_unknown_command() {
        let request = request_ipv4(0x99, [127, 0, 0, 1], 80);

        let parsed = parse_request(&mut Cursor::new(request)).await.unwrap();
        assert_eq!(parsed.command_byte, 0x99);
        assert_eq!(parsed.command(), None);
    }

    #[tokio::test]
    async fn test_parse_request_bind_is_decoded() {
        let request = request_ipv4(SOCKS5_CMD_TCP_BIND, [127, 0, 0, 1], 80);

        let parsed = parse_request(&mut Cursor::new(request)).await.unwrap();
        assert_eq!(parsed.command(), Some(SocksCommand::Bind));
    }

    #[tokio::test]
    async fn test_parse_request_unknown_address_type() {
        let mut request = request_ipv4(SOCKS5_CMD_TCP_CONNECT, [127, 0, 0, 1], 80);
        request[3] = 0x05;

        let err = parse_request(&mut Cursor::new(request)).await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<Socks5Error>(),
            Some(&Socks5Error::AddressTypeNotSupported(0x05))
        );
    }

    #[tokio::test]
    async fn test_parse_request_truncated_address() {
        let mut request = request_ipv4(SOCKS5_CMD_TCP_CONNECT, [127, 0, 0, 1], 80);
        request.truncate(6);

        assert!(parse_request(&mut Cursor::new(request)).await.is_err());
    }

    #[tokio::test]
    async fn test_parse_request_empty_domain() {
        let request = vec![
            SOCKS5_VERSION,
            SOCKS5_CMD_TCP_CONNECT,
            SOCKS5_RESERVED,
            SOCKS5_ADDR_TYPE_DOMAIN,
            0,
            0,
            80,
        ];

        let err = parse_request(&mut Cursor::new(request)).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Socks5Error>(),
            Some(Socks5Error::InvalidDomain(_))
        ));
    }

    #[tokio::test]
    async fn test_parse_request_udp_associate() {
        let request = request_ipv4(SOCKS5_CMD_UDP_ASSOCIATE, [0, 0, 0, 0], 0);

        let parsed = parse_request(&mut Cursor::new(request)).await.unwrap();
        assert_eq!(parsed.command(), Some(SocksCommand::UdpAssociate));
    }
}
