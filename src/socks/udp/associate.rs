//! UDP ASSOCIATE handler
//!
//! Implements the UDP ASSOCIATE command for SOCKS5.

use super::manager::UdpSessionManager;
use crate::socks::command::send_success;
use crate::socks::types::TargetAddr;
use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tracing::{debug, info, warn};

/// Handle UDP ASSOCIATE command
///
/// # Protocol Flow
///
/// 1. Client sends UDP ASSOCIATE with expected DST.ADDR and DST.PORT
/// 2. Server replies with the relay's BND.ADDR:BND.PORT
/// 3. Datagrams from the client's IP are accepted while this connection
///    stays open
/// 4. When the TCP connection closes, new datagrams from that IP are no
///    longer accepted; existing sessions live until they idle out
/// 5. Relay shutdown ends the association and closes the control stream
///
/// # Arguments
///
/// * `control_stream` - The client control stream
/// * `peer` - The client's TCP address
/// * `local` - The local address the control connection arrived on
/// * `requested` - The client's indicated address (informational only)
/// * `manager` - The UDP session manager
pub async fn handle_udp_associate<S>(
    mut control_stream: S,
    peer: SocketAddr,
    local: SocketAddr,
    requested: &TargetAddr,
    manager: &Arc<UdpSessionManager>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let _guard = manager.register_association(peer.ip());
    let bind_addr = reply_addr(manager.local_addr(), local);

    send_success(&mut control_stream, bind_addr).await?;

    info!(
        "UDP ASSOCIATE for {} (requested {}) relaying on {}",
        peer, requested, bind_addr
    );

    tokio::select! {
        _ = monitor_control_stream(control_stream) => {
            info!("UDP ASSOCIATE control connection from {} closed", peer);
        }
        _ = manager.closed() => {
            debug!("UDP relay stopped, ending association for {}", peer);
        }
    }

    Ok(())
}

/// Address announced to the client
///
/// A wildcard UDP bind is replaced by the IP the client reached us on.
fn reply_addr(udp_addr: SocketAddr, control_local: SocketAddr) -> SocketAddr {
    if udp_addr.ip().is_unspecified() {
        SocketAddr::new(control_local.ip().to_canonical(), udp_addr.port())
    } else {
        udp_addr
    }
}

/// Wait until the control stream closes
///
/// The client is not expected to send anything; the read only detects
/// disconnection.
async fn monitor_control_stream<S>(mut stream: S)
where
    S: AsyncRead + Unpin,
{
    let mut buf = [0u8; 64];

    loop {
        match stream.read(&mut buf).await {
            Ok(0) => {
                debug!("Control stream closed");
                break;
            }
            Ok(n) => {
                warn!("Ignoring {} unexpected byte(s) on UDP control stream", n);
            }
            Err(e) => {
                debug!("Control stream error: {}", e);
                break;
            }
        }
    }
}
