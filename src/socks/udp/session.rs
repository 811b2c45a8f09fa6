//! UDP session state
//!
//! A session pairs one client endpoint with one destination and owns the
//! outbound socket connected to that destination.

use crate::socks::types::TargetAddr;
use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Identifies a session: who sent the datagram and where it is going
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    /// Client source address as seen on the client-facing socket
    pub client: SocketAddr,
    /// Destination as named in the datagram header
    pub target: TargetAddr,
}

impl SessionKey {
    pub fn new(client: SocketAddr, target: TargetAddr) -> Self {
        SessionKey { client, target }
    }
}

/// One client↔destination association
#[derive(Debug)]
pub struct UdpSession {
    key: SessionKey,
    remote: SocketAddr,
    socket: Arc<UdpSocket>,
    last_activity: Mutex<Instant>,
    cancel: CancellationToken,
}

impl UdpSession {
    /// Wrap an outbound socket already connected to `remote`
    pub fn new(
        key: SessionKey,
        remote: SocketAddr,
        socket: Arc<UdpSocket>,
        cancel: CancellationToken,
    ) -> Self {
        UdpSession {
            key,
            remote,
            socket,
            last_activity: Mutex::new(Instant::now()),
            cancel,
        }
    }

    /// Client and destination this session serves
    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    /// Resolved destination the outbound socket is connected to
    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    /// Outbound socket connected to the destination
    pub fn socket(&self) -> &Arc<UdpSocket> {
        &self.socket
    }

    /// Record traffic in either direction
    pub fn touch(&self) {
        *self
            .last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    /// Time since the last recorded traffic
    pub fn idle_for(&self, now: Instant) -> Duration {
        let last = *self
            .last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        now.saturating_duration_since(last)
    }

    /// Idle for strictly longer than `timeout`
    pub fn is_expired(&self, now: Instant, timeout: Duration) -> bool {
        self.idle_for(now) > timeout
    }

    /// Forward a client payload to the destination
    pub async fn send(&self, payload: &[u8]) -> io::Result<usize> {
        self.touch();
        self.socket.send(payload).await
    }

    /// Stop the session's receive loop
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Resolves once the session has been cancelled
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}

/// Shared session table
pub type SessionTable = Arc<RwLock<HashMap<SessionKey, Arc<UdpSession>>>>;

/// Client IPs currently holding an open UDP ASSOCIATE control connection
#[derive(Debug, Default)]
pub struct AssociationRegistry {
    active: Mutex<HashMap<IpAddr, usize>>,
}

impl AssociationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `ip` as associated until the returned guard is dropped
    pub fn register(self: &Arc<Self>, ip: IpAddr) -> AssociationGuard {
        let ip = ip.to_canonical();
        *self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(ip)
            .or_insert(0) += 1;

        AssociationGuard {
            registry: Arc::clone(self),
            ip,
        }
    }

    /// Whether `ip` holds at least one open association
    pub fn contains(&self, ip: IpAddr) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&ip.to_canonical())
    }

    fn release(&self, ip: IpAddr) {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(count) = active.get_mut(&ip) {
            *count -= 1;
            if *count == 0 {
                active.remove(&ip);
            }
        }
    }
}

/// Keeps a client IP associated while held
#[derive(Debug)]
pub struct AssociationGuard {
    registry: Arc<AssociationRegistry>,
    ip: IpAddr,
}

impl Drop for AssociationGuard {
    fn drop(&mut self) {
        self.registry.release(self.ip);
    }
}
