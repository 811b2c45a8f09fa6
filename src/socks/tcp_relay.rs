//! TCP relay for SOCKS5 CONNECT command
//!
//! Handles TCP CONNECT requests by establishing a connection to the target
//! and relaying data bidirectionally.

use crate::error::Socks5ReplyCode;
use crate::socks::command::{send_reply_code, send_success};
use crate::socks::types::TargetAddr;
use crate::transport::SocketOpts;
use anyhow::{Context, Result};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Dial each of `addrs` in order until one connects
///
/// `timeout` bounds the whole attempt, not each address. On failure the
/// error of the last address tried is returned; an elapsed timeout
/// surfaces as `io::ErrorKind::TimedOut`.
pub async fn dial_any(addrs: &[SocketAddr], timeout: Option<Duration>) -> io::Result<TcpStream> {
    let attempt = async {
        let mut last_err = None;
        for &addr in addrs {
            match TcpStream::connect(addr).await {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    debug!("Dial {} failed: {}", addr, e);
                    last_err = Some(e);
                }
            }
        }
        Err(last_err
            .unwrap_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no address to dial")))
    };

    match timeout {
        Some(timeout) => tokio::time::timeout(timeout, attempt)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))?,
        None => attempt.await,
    }
}

/// Handle TCP CONNECT command
///
/// This function:
/// 1. Resolves the target address
/// 2. Establishes a TCP connection to the first resolved address that
///    accepts one
/// 3. Sends a success reply with the outbound socket's local address
/// 4. Relays data bidirectionally between client and target
///
/// Resolution and dial failures are answered with a reply code and returned
/// as errors; no relay is started for them.
pub async fn handle_tcp_connect<S>(
    mut client_stream: S,
    target_addr: &TargetAddr,
    connect_timeout: Option<Duration>,
    socket_opts: &SocketOpts,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let candidates = match target_addr.resolve_all().await {
        Ok(addrs) => addrs,
        Err(e) => {
            warn!("Failed to resolve {}: {:#}", target_addr, e);
            send_reply_code(&mut client_stream, Socks5ReplyCode::HostUnreachable).await?;
            return Err(e);
        }
    };

    debug!("Connecting to target {} ({:?})", target_addr, candidates);

    let target_stream = match dial_any(&candidates, connect_timeout).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!("Failed to connect to {}: {}", target_addr, e);
            send_reply_code(&mut client_stream, Socks5ReplyCode::from(&e)).await?;
            return Err(e).with_context(|| format!("Failed to connect to {}", target_addr));
        }
    };
    socket_opts.hint(&target_stream);

    let local_addr = target_stream
        .local_addr()
        .with_context(|| "Failed to read outbound local address")?;
    let remote_addr = target_stream
        .peer_addr()
        .with_context(|| "Failed to read outbound peer address")?;
    send_success(&mut client_stream, local_addr).await?;

    info!("SOCKS5 tunnel established to {} via {}", target_addr, remote_addr);

    relay_tcp(client_stream, target_stream).await
}

/// Relay data bidirectionally between two streams
///
/// This function copies data in both directions concurrently and
/// returns when either direction encounters an error or EOF.
pub async fn relay_tcp<A, B>(a: A, b: B) -> Result<()>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (mut a_read, mut a_write) = tokio::io::split(a);
    let (mut b_read, mut b_write) = tokio::io::split(b);

    let a_to_b = tokio::io::copy(&mut a_read, &mut b_write);
    let b_to_a = tokio::io::copy(&mut b_read, &mut a_write);

    tokio::select! {
        result = a_to_b => {
            match result {
                Ok(bytes) => debug!("Client->target finished: {} bytes", bytes),
                Err(e) => debug!("Client->target error: {}", e),
            }
        }
        result = b_to_a => {
            match result {
                Ok(bytes) => debug!("Target->client finished: {} bytes", bytes),
                Err(e) => debug!("Target->client error: {}", e),
            }
        }
    }

    Ok(())
}
