//! SOCKS5 reply builder
//!
//! Constructs SOCKS5 reply messages.

use crate::error::Socks5ReplyCode;
use crate::socks::consts::*;
use anyhow::Result;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Encode a SOCKS5 reply
///
/// # SOCKS5 Reply Format
///
/// ```text
/// +----+-----+-------+------+----------+----------+
/// |VER | REP |  RSV  | ATYP | BND.ADDR | BND.PORT |
/// +----+-----+-------+------+----------+----------+
/// | 1  |  1  | X'00' |  1   | Variable |    2     |
/// +----+-----+-------+------+----------+----------+
/// ```
///
/// Without a bound address the IPv4 placeholder `0.0.0.0:0` is used.
/// IPv4 addresses, including IPv4-mapped IPv6 ones, take the IPv4 form;
/// everything else takes the IPv6 form.
pub fn encode_reply(code: Socks5ReplyCode, bind_addr: Option<SocketAddr>) -> Vec<u8> {
    let bind_addr = bind_addr
        .unwrap_or_else(|| SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0));

    let mut reply = Vec::with_capacity(3 + 1 + 16 + 2);
    reply.extend_from_slice(&[SOCKS5_VERSION, code.into(), SOCKS5_RESERVED]);

    match bind_addr.ip().to_canonical() {
        IpAddr::V4(ip) => {
            reply.push(SOCKS5_ADDR_TYPE_IPV4);
            reply.extend_from_slice(&ip.octets());
        }
        IpAddr::V6(ip) => {
            reply.push(SOCKS5_ADDR_TYPE_IPV6);
            reply.extend_from_slice(&ip.octets());
        }
    }
    reply.extend_from_slice(&bind_addr.port().to_be_bytes());

    reply
}

/// Build and send a SOCKS5 reply
///
/// # Arguments
///
/// * `stream` - The stream to write to
/// * `code` - The reply status code
/// * `bind_addr` - The bound address (optional, defaults to 0.0.0.0:0)
pub async fn build_reply<S>(
    stream: &mut S,
    code: Socks5ReplyCode,
    bind_addr: Option<SocketAddr>,
) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let reply = encode_reply(code, bind_addr);

    stream.write_all(&reply).await?;
    stream.flush().await?;

    Ok(())
}

/// Send a success reply carrying the bound address
pub async fn send_success<S>(stream: &mut S, bind_addr: SocketAddr) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    build_reply(stream, Socks5ReplyCode::Succeeded, Some(bind_addr)).await
}

/// Send a failure reply with the placeholder address
pub async fn send_reply_code<S>(stream: &mut S, code: Socks5ReplyCode) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    build_reply(stream, code, None).await
}
