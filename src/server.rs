//! SOCKS5 server
//!
//! Binds the listeners, accepts client connections and hands each one to
//! the SOCKS5 handler on its own task.

use crate::config::ServerConfig;
use crate::socks::{handle_socks5_on_stream, ConnectionContext, SocksContext, UdpSessionManager};
use crate::transport::{Acceptor, SocketOpts};
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Main Sockgate server
#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    acceptor: Acceptor,
    client_opts: SocketOpts,
    ctx: Arc<SocksContext>,
}

impl Server {
    /// Validate the configuration and bind every listener
    ///
    /// The UDP relay is started here when enabled, so its address is known
    /// before the first UDP ASSOCIATE arrives.
    pub async fn bind(config: &ServerConfig) -> Result<Self> {
        config.validate()?;

        let acceptor = Acceptor::from_config(&config.tls)?;

        let listen_addr = config.listen_socket_addr()?;
        let listener = TcpListener::bind(listen_addr)
            .await
            .with_context(|| format!("Failed to bind TCP listener on {}", listen_addr))?;
        let local_addr = listener.local_addr()?;

        let udp = if config.udp.enabled {
            let udp_addr = config.udp_listen_addr()?;
            let manager = UdpSessionManager::bind(udp_addr, &config.udp).await?;
            manager.start();
            Some(manager)
        } else {
            None
        };

        info!(
            "Listening on {} ({}, auth {})",
            local_addr,
            if acceptor.is_tls() { "tls" } else { "plain" },
            if config.auth_enabled() { "enabled" } else { "disabled" }
        );

        Ok(Server {
            listener,
            local_addr,
            acceptor,
            client_opts: SocketOpts::from_tcp_config(&config.tcp),
            ctx: Arc::new(SocksContext::from_config(config, udp)),
        })
    }

    /// Bound TCP address
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Bound UDP relay address, when UDP is enabled
    pub fn udp_addr(&self) -> Option<SocketAddr> {
        self.ctx.udp.as_ref().map(|manager| manager.local_addr())
    }

    /// Accept connections until shutdown
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<bool>) -> Result<()> {
        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer)) => self.spawn_connection(stream, peer),
                        Err(e) => error!("Accept error: {}", e),
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping server");
                    break;
                }
            }
        }

        if let Some(manager) = &self.ctx.udp {
            manager.shutdown().await;
        }

        info!("Server stopped");
        Ok(())
    }

    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr) {
        debug!("Accepted connection from {}", peer);
        self.client_opts.hint(&stream);

        let local = stream.local_addr().unwrap_or(self.local_addr);
        let acceptor = self.acceptor.clone();
        let ctx = Arc::clone(&self.ctx);

        tokio::spawn(async move {
            let stream = match acceptor.accept(stream).await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("Transport setup for {} failed: {:#}", peer, e);
                    return;
                }
            };

            let mut conn = ConnectionContext::new(peer, local);
            if let Err(e) = handle_socks5_on_stream(stream, &mut conn, &ctx).await {
                debug!("Connection from {} ended: {:#}", peer, e);
            }
        });
    }
}
