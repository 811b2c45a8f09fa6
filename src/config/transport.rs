//! Transport configuration types
//!
//! Defines socket options and TLS settings for the client-facing listener.

use crate::error::GatewayError;
use serde::{Deserialize, Serialize};

/// Default keepalive seconds
fn default_keepalive_secs() -> u64 {
    20
}

/// Default keepalive interval
fn default_keepalive_interval() -> u64 {
    8
}

fn default_nodelay() -> bool {
    true
}

/// TCP socket configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TcpConfig {
    /// Enable TCP_NODELAY
    #[serde(default = "default_nodelay")]
    pub nodelay: bool,

    /// TCP keepalive timeout in seconds
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,

    /// TCP keepalive interval in seconds
    #[serde(default = "default_keepalive_interval")]
    pub keepalive_interval: u64,
}

impl Default for TcpConfig {
    fn default() -> Self {
        TcpConfig {
            nodelay: default_nodelay(),
            keepalive_secs: default_keepalive_secs(),
            keepalive_interval: default_keepalive_interval(),
        }
    }
}

/// TLS configuration for the client-facing listener
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct TlsConfig {
    /// Wrap accepted connections in TLS
    #[serde(default)]
    pub enabled: bool,

    /// PEM certificate chain path
    #[serde(default)]
    pub cert_file: Option<String>,

    /// PEM private key path
    #[serde(default)]
    pub key_file: Option<String>,
}

impl TlsConfig {
    /// Validate the TLS configuration
    pub fn validate(&self) -> Result<(), GatewayError> {
        if !self.enabled {
            return Ok(());
        }
        if cfg!(not(feature = "rustls-tls")) {
            return Err(GatewayError::Config(
                "TLS enabled but sockgate was built without the rustls-tls feature".to_string(),
            ));
        }
        if self.cert_file.as_deref().map_or(true, str::is_empty)
            || self.key_file.as_deref().map_or(true, str::is_empty)
        {
            return Err(GatewayError::Config(
                "TLS enabled but cert_file or key_file is missing".to_string(),
            ));
        }
        Ok(())
    }
}
