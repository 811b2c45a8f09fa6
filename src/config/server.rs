//! Server configuration types
//!
//! Defines the main configuration structures for the Sockgate server.

use super::{TcpConfig, TlsConfig};
use crate::error::GatewayError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

/// Default listen address
fn default_listen_addr() -> String {
    "0.0.0.0:1080".to_string()
}

/// Default CONNECT dial timeout in seconds
fn default_connect_timeout() -> u64 {
    10
}

/// Root configuration structure
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
}

/// SOCKS5 server configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    /// TCP listen address (e.g., "0.0.0.0:1080")
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Username to password mapping; empty disables authentication
    #[serde(default)]
    pub users: HashMap<String, String>,

    /// CONNECT dial timeout in seconds (0 waits indefinitely)
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,

    /// Socket options for client and destination streams
    #[serde(default)]
    pub tcp: TcpConfig,

    /// TLS configuration for the client-facing listener
    #[serde(default)]
    pub tls: TlsConfig,

    /// UDP ASSOCIATE configuration
    #[serde(default)]
    pub udp: UdpConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            users: HashMap::new(),
            connect_timeout: default_connect_timeout(),
            tcp: TcpConfig::default(),
            tls: TlsConfig::default(),
            udp: UdpConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Check if authentication is enabled
    pub fn auth_enabled(&self) -> bool {
        !self.users.is_empty()
    }

    /// Parsed TCP listen address
    pub fn listen_socket_addr(&self) -> Result<SocketAddr, GatewayError> {
        parse_addr(&self.listen_addr, "listen_addr")
    }

    /// Parsed UDP listen address, defaulting to the TCP listen address
    pub fn udp_listen_addr(&self) -> Result<SocketAddr, GatewayError> {
        match self.udp.listen_addr.as_deref() {
            Some(addr) if !addr.is_empty() => parse_addr(addr, "udp.listen_addr"),
            _ => self.listen_socket_addr(),
        }
    }

    /// CONNECT dial timeout, `None` when disabled
    pub fn connect_timeout(&self) -> Option<Duration> {
        match self.connect_timeout {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), GatewayError> {
        self.listen_socket_addr()?;

        if self.users.keys().any(|name| name.is_empty()) {
            return Err(GatewayError::Config("Usernames must not be empty".to_string()));
        }
        if let Some(name) = self
            .users
            .iter()
            .find(|(name, pass)| name.len() > 255 || pass.len() > 255)
            .map(|(name, _)| name)
        {
            return Err(GatewayError::Config(format!(
                "Credentials for user {} exceed 255 bytes",
                name
            )));
        }

        self.tls.validate()?;

        if self.udp.enabled {
            self.udp_listen_addr()?;
            if self.udp.buffer_size == 0 {
                return Err(GatewayError::Config(
                    "udp.buffer_size must be greater than zero".to_string(),
                ));
            }
            if self.udp.timeout == 0 {
                return Err(GatewayError::Config(
                    "udp.timeout must be greater than zero".to_string(),
                ));
            }
        }

        Ok(())
    }
}

fn parse_addr(addr: &str, field: &str) -> Result<SocketAddr, GatewayError> {
    addr.parse()
        .map_err(|e| GatewayError::Config(format!("Invalid {} {:?}: {}", field, addr, e)))
}

/// Default UDP receive buffer size in bytes
fn default_udp_buffer_size() -> usize {
    65535
}

/// Default UDP session idle timeout in seconds
fn default_udp_timeout() -> u64 {
    60
}

fn default_require_association() -> bool {
    true
}

/// UDP ASSOCIATE configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct UdpConfig {
    /// Enable the UDP ASSOCIATE command
    #[serde(default)]
    pub enabled: bool,

    /// UDP listen address; defaults to the TCP listen address
    #[serde(default)]
    pub listen_addr: Option<String>,

    /// Maximum datagram size accepted from clients and targets
    #[serde(default = "default_udp_buffer_size")]
    pub buffer_size: usize,

    /// Idle session timeout in seconds, also the sweep period
    #[serde(default = "default_udp_timeout")]
    pub timeout: u64,

    /// Only relay datagrams from client IPs holding an open UDP ASSOCIATE
    #[serde(default = "default_require_association")]
    pub require_association: bool,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: None,
            buffer_size: default_udp_buffer_size(),
            timeout: default_udp_timeout(),
            require_association: default_require_association(),
        }
    }
}

impl UdpConfig {
    /// Idle timeout as a duration
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}
