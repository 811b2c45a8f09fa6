//! UDP session manager
//!
//! Owns the client-facing UDP socket and the session table. Datagrams from
//! clients are decapsulated and forwarded through a per-session socket
//! connected to the destination; datagrams coming back are framed and sent
//! to the client that opened the session.

use super::packet::{encode_udp_reply, parse_udp_packet};
use super::session::{AssociationGuard, AssociationRegistry, SessionKey, SessionTable, UdpSession};
use crate::config::UdpConfig;
use anyhow::{Context, Result};
use bytes::Bytes;
use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Shared state of the UDP relay
#[derive(Debug)]
pub struct UdpSessionManager {
    /// Client-facing socket; taken on shutdown so the port is released
    socket: Mutex<Option<Arc<UdpSocket>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    local_addr: SocketAddr,
    sessions: SessionTable,
    associations: Arc<AssociationRegistry>,
    idle_timeout: Duration,
    buffer_size: usize,
    require_association: bool,
    shutdown: CancellationToken,
}

impl UdpSessionManager {
    /// Bind the client-facing socket using the UDP configuration
    pub async fn bind(addr: SocketAddr, config: &UdpConfig) -> Result<Arc<Self>> {
        Self::bind_with(
            addr,
            config.idle_timeout(),
            config.buffer_size,
            config.require_association,
        )
        .await
    }

    /// Bind with explicit parameters
    pub async fn bind_with(
        addr: SocketAddr,
        idle_timeout: Duration,
        buffer_size: usize,
        require_association: bool,
    ) -> Result<Arc<Self>> {
        let socket = UdpSocket::bind(addr)
            .await
            .with_context(|| format!("Failed to bind UDP socket on {}", addr))?;
        let local_addr = socket
            .local_addr()
            .with_context(|| "Failed to read UDP local address")?;

        Ok(Arc::new(UdpSessionManager {
            socket: Mutex::new(Some(Arc::new(socket))),
            tasks: Mutex::new(Vec::new()),
            local_addr,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            associations: Arc::new(AssociationRegistry::new()),
            idle_timeout,
            buffer_size,
            require_association,
            shutdown: CancellationToken::new(),
        }))
    }

    /// Spawn the client-facing receive loop and the idle sweep
    pub fn start(self: &Arc<Self>) {
        info!(
            "UDP relay listening on {} (idle timeout {:?})",
            self.local_addr, self.idle_timeout
        );
        let receiver = tokio::spawn(Arc::clone(self).run_receiver());
        let sweeper = tokio::spawn(Arc::clone(self).run_sweeper());
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend([receiver, sweeper]);
    }

    /// Address of the client-facing socket
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept datagrams from `ip` while the guard is held
    pub fn register_association(&self, ip: IpAddr) -> AssociationGuard {
        self.associations.register(ip)
    }

    /// Number of live sessions
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Stop all loops, drop every session and close the client-facing socket
    ///
    /// The port is free once this returns.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();

        let count = {
            let mut sessions = self.sessions.write().await;
            for session in sessions.values() {
                session.cancel();
            }
            let count = sessions.len();
            sessions.clear();
            count
        };

        self.socket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let tasks: Vec<_> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for task in tasks {
            if let Err(e) = task.await {
                debug!("UDP relay task failed: {}", e);
            }
        }

        info!("UDP relay stopped, {} session(s) closed", count);
    }

    /// Whether `shutdown` has been called
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Resolves once `shutdown` has been called
    pub async fn closed(&self) {
        self.shutdown.cancelled().await
    }

    fn client_socket(&self) -> Option<Arc<UdpSocket>> {
        self.socket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Remove sessions idle for longer than the timeout; returns how many
    pub async fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();

        sessions.retain(|key, session| {
            let expired = session.is_expired(now, self.idle_timeout);
            if expired {
                debug!("Evicting idle UDP session {} -> {}", key.client, key.target);
                session.cancel();
            }
            !expired
        });

        before - sessions.len()
    }

    async fn run_receiver(self: Arc<Self>) {
        let Some(socket) = self.client_socket() else {
            return;
        };
        let mut buf = vec![0u8; self.buffer_size];

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                result = socket.recv_from(&mut buf) => {
                    match result {
                        Ok((len, client)) => self.handle_datagram(client, &buf[..len]).await,
                        Err(e) => debug!("UDP receive error: {}", e),
                    }
                }
            }
        }

        debug!("UDP receiver on {} terminated", self.local_addr);
    }

    async fn handle_datagram(self: &Arc<Self>, client: SocketAddr, data: &[u8]) {
        if self.require_association && !self.associations.contains(client.ip()) {
            debug!("Dropping UDP datagram from unassociated client {}", client);
            return;
        }

        let packet = match parse_udp_packet(data) {
            Ok(packet) => packet,
            Err(e) => {
                debug!("Dropping malformed UDP datagram from {}: {}", client, e);
                return;
            }
        };
        if packet.is_fragmented() {
            trace!("Ignoring FRAG={} from {}", packet.frag, client);
        }

        let key = SessionKey::new(client, packet.target);
        let existing = self.sessions.read().await.get(&key).cloned();

        match existing {
            Some(session) => {
                if let Err(e) = session.send(packet.payload).await {
                    debug!("UDP send to {} failed: {}", session.remote(), e);
                }
            }
            None => {
                let payload = Bytes::copy_from_slice(packet.payload);
                tokio::spawn(Arc::clone(self).create_session(key, payload));
            }
        }
    }

    async fn create_session(self: Arc<Self>, key: SessionKey, payload: Bytes) {
        let opened = match self.open_session(&key).await {
            Ok(session) => session,
            Err(e) => {
                warn!("Failed to open UDP session {} -> {}: {:#}", key.client, key.target, e);
                return;
            }
        };

        let session = {
            let mut sessions = self.sessions.write().await;
            if self.is_shutdown() {
                return;
            }
            if let Some(existing) = sessions.get(&key).cloned() {
                existing
            } else {
                sessions.insert(key.clone(), Arc::clone(&opened));
                tokio::spawn(Arc::clone(&self).run_target_receiver(Arc::clone(&opened)));
                debug!(
                    "UDP session opened {} -> {} ({})",
                    key.client,
                    key.target,
                    opened.remote()
                );
                opened
            }
        };

        if let Err(e) = session.send(&payload).await {
            debug!("UDP send to {} failed: {}", session.remote(), e);
        }
    }

    /// Open an outbound socket to the first resolved address that accepts one
    async fn open_session(&self, key: &SessionKey) -> Result<Arc<UdpSession>> {
        let candidates = key.target.resolve_all().await?;

        let mut last_err = None;
        for remote in candidates {
            match connect_outbound(remote).await {
                Ok(socket) => {
                    return Ok(Arc::new(UdpSession::new(
                        key.clone(),
                        remote,
                        Arc::new(socket),
                        self.shutdown.child_token(),
                    )));
                }
                Err(e) => {
                    trace!("Outbound UDP to {} failed: {}", remote, e);
                    last_err = Some((remote, e));
                }
            }
        }

        match last_err {
            Some((remote, e)) => {
                Err(e).with_context(|| format!("Failed to connect UDP socket to {}", remote))
            }
            None => anyhow::bail!("No addresses found for {}", key.target),
        }
    }

    async fn run_target_receiver(self: Arc<Self>, session: Arc<UdpSession>) {
        let mut buf = vec![0u8; self.buffer_size];
        let client = session.key().client;

        loop {
            tokio::select! {
                _ = session.cancelled() => break,
                result = session.socket().recv_from(&mut buf) => {
                    match result {
                        Ok((len, source)) => {
                            session.touch();
                            let Some(socket) = self.client_socket() else {
                                break;
                            };
                            let framed = encode_udp_reply(source, &buf[..len]);
                            if let Err(e) = socket.send_to(&framed, client).await {
                                debug!("UDP reply to {} failed: {}", client, e);
                            }
                        }
                        Err(e) => {
                            debug!("UDP session {} -> {} read error: {}", client, session.remote(), e);
                            self.remove_session(&session).await;
                            break;
                        }
                    }
                }
            }
        }

        trace!("UDP target receiver for {} -> {} terminated", client, session.remote());
    }

    /// Drop `session` from the table if it is still the registered one
    async fn remove_session(&self, session: &Arc<UdpSession>) {
        session.cancel();
        let mut sessions = self.sessions.write().await;
        if sessions
            .get(session.key())
            .is_some_and(|current| Arc::ptr_eq(current, session))
        {
            sessions.remove(session.key());
        }
    }

    async fn run_sweeper(self: Arc<Self>) {
        let start = tokio::time::Instant::now() + self.idle_timeout;
        let mut interval = tokio::time::interval_at(start, self.idle_timeout);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = interval.tick() => {
                    let evicted = self.sweep_expired().await;
                    if evicted > 0 {
                        debug!("Evicted {} idle UDP session(s)", evicted);
                    }
                }
            }
        }
    }
}

async fn connect_outbound(remote: SocketAddr) -> io::Result<UdpSocket> {
    let bind_addr = if remote.is_ipv4() {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)
    } else {
        SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0)
    };

    let socket = UdpSocket::bind(bind_addr).await?;
    socket.connect(remote).await?;
    Ok(socket)
}
