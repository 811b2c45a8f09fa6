//! SOCKS5 command parsing module
//!
//! Handles parsing SOCKS5 requests and building replies.

mod parser;
mod reply;

pub use parser::{parse_request, Request};
pub use reply::{build_reply, encode_reply, send_reply_code, send_success};
