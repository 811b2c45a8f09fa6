//! UDP ASSOCIATE support
//!
//! The coordinator in `associate` answers the TCP command; the session
//! manager relays the datagrams.

mod associate;
mod manager;
mod packet;
mod session;

pub use associate::handle_udp_associate;
pub use manager::UdpSessionManager;
pub use packet::{encode_udp_reply, parse_udp_packet, UdpPacket};
pub use session::{AssociationGuard, AssociationRegistry, SessionKey, SessionTable, UdpSession};
