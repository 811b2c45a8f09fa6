//! Main SOCKS5 handler
//!
//! This module provides the main entry point for handling SOCKS5 requests
//! on accepted client streams. It orchestrates authentication, request
//! parsing, and request handling.

use crate::config::ServerConfig;
use crate::error::{Socks5Error, Socks5ReplyCode};
use crate::socks::auth::{authenticate, AuthMethod, Credentials};
use crate::socks::command::{parse_request, send_reply_code, Request};
use crate::socks::tcp_relay::handle_tcp_connect;
use crate::socks::types::SocksCommand;
use crate::socks::udp::{handle_udp_associate, UdpSessionManager};
use crate::transport::SocketOpts;
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

/// Shared, read-only state every connection handler needs
#[derive(Debug, Clone)]
pub struct SocksContext {
    /// Username/password store; empty disables authentication
    pub credentials: Arc<Credentials>,
    /// CONNECT dial timeout
    pub connect_timeout: Option<Duration>,
    /// Options applied to dialed destination streams
    pub socket_opts: SocketOpts,
    /// UDP relay, present when UDP ASSOCIATE is enabled
    pub udp: Option<Arc<UdpSessionManager>>,
}

impl SocksContext {
    /// Build the context from server configuration
    pub fn from_config(config: &ServerConfig, udp: Option<Arc<UdpSessionManager>>) -> Self {
        SocksContext {
            credentials: Arc::new(Credentials::new(config.users.clone())),
            connect_timeout: config.connect_timeout(),
            socket_opts: SocketOpts::from_tcp_config(&config.tcp),
            udp,
        }
    }
}

impl Default for SocksContext {
    fn default() -> Self {
        SocksContext {
            credentials: Arc::new(Credentials::default()),
            connect_timeout: None,
            socket_opts: SocketOpts::default(),
            udp: None,
        }
    }
}

/// Per-connection state owned by the connection task
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    /// Client address
    pub peer: SocketAddr,
    /// Local address the client connected to
    pub local: SocketAddr,
    /// Negotiated method, once authentication succeeded
    pub authenticated: Option<AuthMethod>,
    /// Parsed request, once read
    pub request: Option<Request>,
}

impl ConnectionContext {
    pub fn new(peer: SocketAddr, local: SocketAddr) -> Self {
        ConnectionContext {
            peer,
            local,
            authenticated: None,
            request: None,
        }
    }
}

/// Handle SOCKS5 protocol on a stream
///
/// This is the main entry point for processing SOCKS5 requests.
///
/// # Protocol Flow
///
/// 1. Authentication negotiation
/// 2. Username/password authentication (if required)
/// 3. Request parsing
/// 4. Command execution (CONNECT or UDP ASSOCIATE)
///
/// Malformed frames close the connection without a reply. An unknown
/// address type or command is answered before closing.
pub async fn handle_socks5_on_stream<S>(
    mut stream: S,
    conn: &mut ConnectionContext,
    ctx: &SocksContext,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    // Step 1: Authentication negotiation
    let method = authenticate(&mut stream, &ctx.credentials)
        .await
        .with_context(|| "Authentication negotiation failed")?;
    conn.authenticated = Some(method);

    debug!("Client {} authenticated with method: {:?}", conn.peer, method);

    // Step 2: Read and parse the SOCKS5 request
    let request = match parse_request(&mut stream).await {
        Ok(request) => request,
        Err(e) => {
            if let Some(Socks5Error::AddressTypeNotSupported(atyp)) = e.downcast_ref::<Socks5Error>() {
                warn!("Address type {:#04x} from {} not supported", atyp, conn.peer);
                send_reply_code(&mut stream, Socks5ReplyCode::AddressTypeNotSupported).await?;
            }
            return Err(e.context("Failed to parse SOCKS5 request"));
        }
    };
    conn.request = Some(request.clone());

    // Step 3: Execute the command
    match request.command() {
        Some(SocksCommand::Connect) => {
            info!("SOCKS5 CONNECT from {} to {}", conn.peer, request.target);
            handle_tcp_connect(stream, &request.target, ctx.connect_timeout, &ctx.socket_opts)
                .await?;
        }
        Some(SocksCommand::UdpAssociate) => match &ctx.udp {
            Some(manager) => {
                info!("SOCKS5 UDP ASSOCIATE from {}", conn.peer);
                handle_udp_associate(stream, conn.peer, conn.local, &request.target, manager)
                    .await?;
            }
            None => {
                warn!("UDP ASSOCIATE from {} rejected: UDP disabled", conn.peer);
                send_reply_code(&mut stream, Socks5ReplyCode::CommandNotSupported).await?;
                return Err(Socks5Error::CommandNotSupported(request.command_byte).into());
            }
        },
        Some(SocksCommand::Bind) | None => {
            warn!(
                "Command {:#04x} from {} not supported",
                request.command_byte, conn.peer
            );
            send_reply_code(&mut stream, Socks5ReplyCode::CommandNotSupported).await?;
            return Err(Socks5Error::CommandNotSupported(request.command_byte).into());
        }
    }

    Ok(())
}
