//! Transport module for Sockgate
//!
//! This module provides the client-facing transport layer: socket options,
//! the boxed byte-stream abstraction the SOCKS5 core runs on, and the
//! acceptor that optionally wraps accepted connections in TLS.

#[cfg(feature = "rustls-tls")]
mod tls;

#[cfg(feature = "rustls-tls")]
pub use tls::build_tls_acceptor;

use crate::config::{TcpConfig, TlsConfig};
use anyhow::{Context, Result};
use std::fmt::Debug;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Socket options for configuring connections
#[derive(Debug, Clone)]
pub struct SocketOpts {
    /// Enable TCP_NODELAY
    pub nodelay: bool,
    /// TCP keepalive timeout
    pub keepalive_secs: Option<u64>,
    /// TCP keepalive interval
    pub keepalive_interval: Option<u64>,
}

impl Default for SocketOpts {
    fn default() -> Self {
        SocketOpts {
            nodelay: true,
            keepalive_secs: Some(20),
            keepalive_interval: Some(8),
        }
    }
}

impl SocketOpts {
    /// Create socket options from TCP config
    pub fn from_tcp_config(config: &TcpConfig) -> Self {
        SocketOpts {
            nodelay: config.nodelay,
            keepalive_secs: Some(config.keepalive_secs).filter(|secs| *secs > 0),
            keepalive_interval: Some(config.keepalive_interval).filter(|secs| *secs > 0),
        }
    }

    /// Apply socket options to a TCP stream
    pub fn apply(&self, stream: &TcpStream) -> std::io::Result<()> {
        stream.set_nodelay(self.nodelay)?;

        if let (Some(timeout), Some(interval)) = (self.keepalive_secs, self.keepalive_interval) {
            let socket = socket2::SockRef::from(stream);
            let keepalive = socket2::TcpKeepalive::new()
                .with_time(Duration::from_secs(timeout))
                .with_interval(Duration::from_secs(interval));
            socket.set_tcp_keepalive(&keepalive)?;
        }

        Ok(())
    }

    /// Apply options, logging instead of failing
    pub fn hint(&self, stream: &TcpStream) {
        if let Err(e) = self.apply(stream) {
            tracing::warn!("Failed to apply socket options: {}", e);
        }
    }
}

/// Dynamic stream trait for boxed streams
pub trait StreamDyn: AsyncRead + AsyncWrite + Unpin + Send + Debug {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + Debug> StreamDyn for T {}

/// Turns accepted TCP connections into the byte streams the SOCKS5 core serves
#[derive(Clone)]
pub enum Acceptor {
    /// Plain TCP
    Plain,
    /// TLS-terminated TCP
    #[cfg(feature = "rustls-tls")]
    Tls(tokio_rustls::TlsAcceptor),
}

impl Debug for Acceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Acceptor::Plain => write!(f, "Acceptor::Plain"),
            #[cfg(feature = "rustls-tls")]
            Acceptor::Tls(_) => write!(f, "Acceptor::Tls"),
        }
    }
}

impl Acceptor {
    /// Create an acceptor from TLS configuration
    ///
    /// Certificate loading errors are fatal; callers surface them at startup.
    pub fn from_config(config: &TlsConfig) -> Result<Self> {
        if !config.enabled {
            return Ok(Acceptor::Plain);
        }

        #[cfg(feature = "rustls-tls")]
        {
            let cert = config
                .cert_file
                .as_deref()
                .context("TLS enabled but cert_file is missing")?;
            let key = config
                .key_file
                .as_deref()
                .context("TLS enabled but key_file is missing")?;
            Ok(Acceptor::Tls(build_tls_acceptor(cert, key)?))
        }

        #[cfg(not(feature = "rustls-tls"))]
        {
            anyhow::bail!("TLS enabled but sockgate was built without the rustls-tls feature")
        }
    }

    /// Whether accepted connections are TLS-wrapped
    pub fn is_tls(&self) -> bool {
        !matches!(self, Acceptor::Plain)
    }

    /// Complete transport setup for an accepted connection
    pub async fn accept(&self, stream: TcpStream) -> Result<Box<dyn StreamDyn>> {
        match self {
            Acceptor::Plain => Ok(Box::new(stream)),
            #[cfg(feature = "rustls-tls")]
            Acceptor::Tls(acceptor) => {
                let tls_stream = acceptor
                    .accept(stream)
                    .await
                    .with_context(|| "TLS handshake failed")?;
                Ok(Box::new(tls_stream))
            }
        }
    }
}
