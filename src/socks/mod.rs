//! SOCKS5 protocol engine
//!
//! Negotiation, the request/reply codec, the TCP relay and the UDP
//! association subsystem. Everything here runs on plain
//! `AsyncRead + AsyncWrite` streams; transport setup happens before.

pub mod auth;
pub mod command;
pub mod consts;
pub mod handler;
pub mod tcp_relay;
pub mod types;
pub mod udp;

pub use auth::{authenticate, select_auth_method, AuthMethod, AuthState, Credentials};
pub use command::{encode_reply, parse_request, Request};
pub use handler::{handle_socks5_on_stream, ConnectionContext, SocksContext};
pub use tcp_relay::{handle_tcp_connect, relay_tcp};
pub use types::{SocksCommand, TargetAddr};
pub use udp::{handle_udp_associate, UdpSessionManager};
