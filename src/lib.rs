//! # Sockgate - SOCKS5 Proxy Gateway
//!
//! Sockgate terminates SOCKS5 client connections, negotiates
//! authentication and relays TCP streams and UDP datagrams to the
//! destinations clients ask for, optionally behind TLS.
//!
//! ## Features
//!
//! - **Username/Password Auth**: RFC 1929 against a static user table
//! - **CONNECT**: full-duplex TCP relay with configurable dial timeout
//! - **UDP ASSOCIATE**: per-client, per-destination session table with idle eviction
//! - **TLS Control Channel**: rustls-terminated client connections
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sockgate::config::load_config;
//! use sockgate::Server;
//! use tokio::sync::broadcast;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config("config.toml")?;
//!     let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
//!
//!     Server::bind(&config.server).await?.run(shutdown_rx).await
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! SOCKS5 Client -> [TLS] -> Sockgate -> Target (TCP)
//!        \________ UDP relay _______/ -> Target (UDP)
//! ```

#![warn(rust_2018_idioms)]

pub mod config;
pub mod error;
pub mod server;
pub mod socks;
pub mod transport;

// Re-export commonly used items
pub use config::{load_config, Config};
pub use error::{GatewayError, Socks5Error, Socks5ReplyCode};
pub use server::Server;

/// Version of the Sockgate library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the application
pub const NAME: &str = env!("CARGO_PKG_NAME");
