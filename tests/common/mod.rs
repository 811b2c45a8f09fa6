//! Test utilities for Sockgate
//!
//! This module provides common test utilities used across integration tests.

#![allow(dead_code)]

use sockgate::config::{ServerConfig, TlsConfig, UdpConfig};
use sockgate::Server;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::broadcast;

/// Username configured by `TestConfigBuilder::with_user`
pub const TEST_USER: &str = "testuser";
/// Password configured by `TestConfigBuilder::with_user`
pub const TEST_PASS: &str = "testpass";

/// Spawn a TCP echo server
pub async fn spawn_tcp_echo() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut r, mut w) = stream.split();
                let _ = tokio::io::copy(&mut r, &mut w).await;
            });
        }
    });

    addr
}

/// Spawn a UDP echo server
pub async fn spawn_udp_echo() -> SocketAddr {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();

    tokio::spawn(async move {
        let mut buf = [0u8; 65535];
        while let Ok((len, peer)) = socket.recv_from(&mut buf).await {
            let _ = socket.send_to(&buf[..len], peer).await;
        }
    });

    addr
}

/// An address nothing listens on
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// Test configuration builder
pub struct TestConfigBuilder {
    users: HashMap<String, String>,
    udp: bool,
    require_association: bool,
    tls: Option<(String, String)>,
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        TestConfigBuilder {
            users: HashMap::new(),
            udp: false,
            require_association: true,
            tls: None,
        }
    }
}

impl TestConfigBuilder {
    /// Create a new test config builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Require authentication as `TEST_USER` / `TEST_PASS`
    pub fn with_user(mut self) -> Self {
        self.users.insert(TEST_USER.to_string(), TEST_PASS.to_string());
        self
    }

    /// Enable UDP ASSOCIATE
    pub fn udp(mut self, enabled: bool) -> Self {
        self.udp = enabled;
        self
    }

    /// Accept datagrams only from associated clients
    pub fn require_association(mut self, required: bool) -> Self {
        self.require_association = required;
        self
    }

    /// Terminate TLS with the given PEM files
    pub fn tls(mut self, cert_file: &str, key_file: &str) -> Self {
        self.tls = Some((cert_file.to_string(), key_file.to_string()));
        self
    }

    /// Build the configuration
    pub fn build(self) -> ServerConfig {
        ServerConfig {
            listen_addr: "127.0.0.1:0".to_string(),
            users: self.users,
            connect_timeout: 5,
            tls: match self.tls {
                Some((cert, key)) => TlsConfig {
                    enabled: true,
                    cert_file: Some(cert),
                    key_file: Some(key),
                },
                None => TlsConfig::default(),
            },
            udp: UdpConfig {
                enabled: self.udp,
                require_association: self.require_association,
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

/// A running server and its shutdown handle
pub struct TestServer {
    pub addr: SocketAddr,
    pub udp_addr: Option<SocketAddr>,
    shutdown_tx: broadcast::Sender<bool>,
}

impl TestServer {
    /// Bind and run a server in the background
    pub async fn start(config: ServerConfig) -> Self {
        let server = Server::bind(&config).await.unwrap();
        let addr = server.local_addr();
        let udp_addr = server.udp_addr();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        tokio::spawn(server.run(shutdown_rx));

        TestServer {
            addr,
            udp_addr,
            shutdown_tx,
        }
    }

    /// Open a plain TCP connection to the server
    pub async fn connect(&self) -> TcpStream {
        TcpStream::connect(self.addr).await.unwrap()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

/// Read with a deadline so a broken server fails the test instead of hanging
pub async fn read_exact_timeout<S>(stream: &mut S, len: usize) -> Vec<u8>
where
    S: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; len];
    tokio::time::timeout(Duration::from_secs(5), stream.read_exact(&mut buf))
        .await
        .expect("timed out reading from server")
        .unwrap();
    buf
}

/// Assert the server closes the stream without sending anything else
pub async fn assert_closed<S>(stream: &mut S)
where
    S: AsyncRead + Unpin,
{
    let mut buf = [0u8; 1];
    let read = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf))
        .await
        .expect("timed out waiting for close");
    // A reset is as good as an orderly close
    if let Ok(n) = read {
        assert_eq!(n, 0, "unexpected data after close");
    }
}

/// Negotiate "no authentication" and return the selected method
pub async fn negotiate_no_auth<S>(stream: &mut S) -> Vec<u8>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(&socks5_mock::auth_request_no_auth()).await.unwrap();
    read_exact_timeout(stream, 2).await
}

/// Send a request and read a 10 byte IPv4-form reply
pub async fn send_request<S>(stream: &mut S, request: &[u8]) -> Vec<u8>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(request).await.unwrap();
    read_exact_timeout(stream, 10).await
}

/// Port carried in a 10 byte IPv4-form reply
pub fn reply_port(reply: &[u8]) -> u16 {
    u16::from_be_bytes([reply[8], reply[9]])
}

/// SOCKS5 frame builders
pub mod socks5_mock {
    use sockgate::socks::consts::*;
    use std::net::{IpAddr, SocketAddr};

    /// Create a no-auth method selection request
    pub fn auth_request_no_auth() -> Vec<u8> {
        vec![SOCKS5_VERSION, 1, SOCKS5_AUTH_METHOD_NONE]
    }

    /// Create a method selection request offering the given methods
    pub fn auth_request(methods: &[u8]) -> Vec<u8> {
        let mut request = vec![SOCKS5_VERSION, methods.len() as u8];
        request.extend_from_slice(methods);
        request
    }

    /// Create a username/password sub-negotiation frame
    pub fn user_pass(username: &str, password: &str) -> Vec<u8> {
        let mut frame = vec![SOCKS5_AUTH_VERSION, username.len() as u8];
        frame.extend_from_slice(username.as_bytes());
        frame.push(password.len() as u8);
        frame.extend_from_slice(password.as_bytes());
        frame
    }

    /// Create a request for an IP destination
    pub fn request(cmd: u8, addr: SocketAddr) -> Vec<u8> {
        let mut request = vec![SOCKS5_VERSION, cmd, SOCKS5_RESERVED];
        match addr.ip() {
            IpAddr::V4(ip) => {
                request.push(SOCKS5_ADDR_TYPE_IPV4);
                request.extend_from_slice(&ip.octets());
            }
            IpAddr::V6(ip) => {
                request.push(SOCKS5_ADDR_TYPE_IPV6);
                request.extend_from_slice(&ip.octets());
            }
        }
        request.extend_from_slice(&addr.port().to_be_bytes());
        request
    }

    /// Create a CONNECT request
    pub fn connect(addr: SocketAddr) -> Vec<u8> {
        request(SOCKS5_CMD_TCP_CONNECT, addr)
    }

    /// Create a CONNECT request to a domain
    pub fn connect_domain(domain: &str, port: u16) -> Vec<u8> {
        let mut cmd = vec![
            SOCKS5_VERSION,
            SOCKS5_CMD_TCP_CONNECT,
            SOCKS5_RESERVED,
            SOCKS5_ADDR_TYPE_DOMAIN,
            domain.len() as u8,
        ];
        cmd.extend_from_slice(domain.as_bytes());
        cmd.extend_from_slice(&port.to_be_bytes());
        cmd
    }

    /// Create a UDP ASSOCIATE request with the all-zero address
    pub fn udp_associate() -> Vec<u8> {
        request(SOCKS5_CMD_UDP_ASSOCIATE, "0.0.0.0:0".parse().unwrap())
    }

    /// Frame a datagram for an IPv4 destination
    pub fn udp_datagram(target: SocketAddr, payload: &[u8]) -> Vec<u8> {
        let mut datagram = vec![0, 0, 0];
        datagram.extend_from_slice(&request(0, target)[3..]);
        datagram.extend_from_slice(payload);
        datagram
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sockgate::socks::consts::*;

    #[test]
    fn test_config_builder() {
        let config = TestConfigBuilder::new().with_user().udp(true).build();

        assert!(config.auth_enabled());
        assert!(config.udp.enabled);
        assert!(config.udp.require_association);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_socks5_mock_connect_ipv4() {
        let cmd = socks5_mock::connect("192.168.1.1:8080".parse().unwrap());
        assert_eq!(cmd[0], SOCKS5_VERSION);
        assert_eq!(cmd[1], SOCKS5_CMD_TCP_CONNECT);
        assert_eq!(cmd[3], SOCKS5_ADDR_TYPE_IPV4);
        assert_eq!(&cmd[4..8], &[192, 168, 1, 1]);
    }

    #[test]
    fn test_socks5_mock_udp_datagram() {
        let datagram = socks5_mock::udp_datagram("10.0.0.1:53".parse().unwrap(), b"q");
        assert_eq!(datagram, vec![0, 0, 0, SOCKS5_ADDR_TYPE_IPV4, 10, 0, 0, 1, 0, 53, b'q']);
    }
}
