//! End-to-end tests against a running server

mod common;

use common::*;
use sockgate::socks::consts::*;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UdpSocket;

#[tokio::test]
async fn test_gssapi_only_offer_is_rejected() {
    let server = TestServer::start(TestConfigBuilder::new().build()).await;
    let mut stream = server.connect().await;

    stream
        .write_all(&socks5_mock::auth_request(&[SOCKS5_AUTH_METHOD_GSSAPI]))
        .await
        .unwrap();

    let reply = read_exact_timeout(&mut stream, 2).await;
    assert_eq!(reply, vec![SOCKS5_VERSION, SOCKS5_AUTH_METHOD_NOT_ACCEPTABLE]);
    assert_closed(&mut stream).await;
}

#[tokio::test]
async fn test_connect_echo_no_auth() {
    let echo = spawn_tcp_echo().await;
    let server = TestServer::start(TestConfigBuilder::new().build()).await;
    let mut stream = server.connect().await;

    assert_eq!(
        negotiate_no_auth(&mut stream).await,
        vec![SOCKS5_VERSION, SOCKS5_AUTH_METHOD_NONE]
    );

    let reply = send_request(&mut stream, &socks5_mock::connect(echo)).await;
    assert_eq!(reply[0], SOCKS5_VERSION);
    assert_eq!(reply[1], SOCKS5_REPLY_SUCCEEDED);
    assert_eq!(reply[3], SOCKS5_ADDR_TYPE_IPV4);
    assert_ne!(reply_port(&reply), 0);

    for message in [&b"first"[..], &b"second message"[..]] {
        stream.write_all(message).await.unwrap();
        let echoed = read_exact_timeout(&mut stream, message.len()).await;
        assert_eq!(echoed, message);
    }
}

#[tokio::test]
async fn test_password_auth_success() {
    let echo = spawn_tcp_echo().await;
    let server = TestServer::start(TestConfigBuilder::new().with_user().build()).await;
    let mut stream = server.connect().await;

    stream
        .write_all(&socks5_mock::auth_request(&[
            SOCKS5_AUTH_METHOD_NONE,
            SOCKS5_AUTH_METHOD_PASSWORD,
        ]))
        .await
        .unwrap();
    assert_eq!(
        read_exact_timeout(&mut stream, 2).await,
        vec![SOCKS5_VERSION, SOCKS5_AUTH_METHOD_PASSWORD]
    );

    stream
        .write_all(&socks5_mock::user_pass(TEST_USER, TEST_PASS))
        .await
        .unwrap();
    assert_eq!(
        read_exact_timeout(&mut stream, 2).await,
        vec![SOCKS5_AUTH_VERSION, SOCKS5_AUTH_SUCCESS]
    );

    let reply = send_request(&mut stream, &socks5_mock::connect(echo)).await;
    assert_eq!(reply[1], SOCKS5_REPLY_SUCCEEDED);

    stream.write_all(b"authenticated").await.unwrap();
    assert_eq!(read_exact_timeout(&mut stream, 13).await, b"authenticated");
}

#[tokio::test]
async fn test_password_auth_failure_closes() {
    let server = TestServer::start(TestConfigBuilder::new().with_user().build()).await;
    let mut stream = server.connect().await;

    stream
        .write_all(&socks5_mock::auth_request(&[SOCKS5_AUTH_METHOD_PASSWORD]))
        .await
        .unwrap();
    read_exact_timeout(&mut stream, 2).await;

    stream
        .write_all(&socks5_mock::user_pass(TEST_USER, "wrong"))
        .await
        .unwrap();
    assert_eq!(
        read_exact_timeout(&mut stream, 2).await,
        vec![SOCKS5_AUTH_VERSION, SOCKS5_AUTH_FAILURE]
    );
    assert_closed(&mut stream).await;
}

#[tokio::test]
async fn test_auth_required_rejects_no_auth_client() {
    let server = TestServer::start(TestConfigBuilder::new().with_user().build()).await;
    let mut stream = server.connect().await;

    assert_eq!(
        negotiate_no_auth(&mut stream).await,
        vec![SOCKS5_VERSION, SOCKS5_AUTH_METHOD_NOT_ACCEPTABLE]
    );
    assert_closed(&mut stream).await;
}

#[tokio::test]
async fn test_connect_refused() {
    let target = closed_port().await;
    let server = TestServer::start(TestConfigBuilder::new().build()).await;
    let mut stream = server.connect().await;

    negotiate_no_auth(&mut stream).await;
    let reply = send_request(&mut stream, &socks5_mock::connect(target)).await;

    assert_eq!(reply[1], SOCKS5_REPLY_CONNECTION_REFUSED);
    assert_eq!(&reply[3..], &[SOCKS5_ADDR_TYPE_IPV4, 0, 0, 0, 0, 0, 0]);
    assert_closed(&mut stream).await;
}

#[tokio::test]
async fn test_connect_domain_localhost() {
    let echo = spawn_tcp_echo().await;
    let server = TestServer::start(TestConfigBuilder::new().build()).await;
    let mut stream = server.connect().await;

    negotiate_no_auth(&mut stream).await;
    stream
        .write_all(&socks5_mock::connect_domain("localhost", echo.port()))
        .await
        .unwrap();

    // Any ::1 answer has no listener; the IPv4 loopback one does
    let mut head = [0u8; 4];
    stream.read_exact(&mut head).await.unwrap();
    assert_eq!(head[1], SOCKS5_REPLY_SUCCEEDED);
}

#[tokio::test]
async fn test_bind_not_supported() {
    let server = TestServer::start(TestConfigBuilder::new().build()).await;
    let mut stream = server.connect().await;

    negotiate_no_auth(&mut stream).await;
    let request = socks5_mock::request(SOCKS5_CMD_TCP_BIND, "127.0.0.1:80".parse().unwrap());
    let reply = send_request(&mut stream, &request).await;

    assert_eq!(reply[1], SOCKS5_REPLY_COMMAND_NOT_SUPPORTED);
    assert_closed(&mut stream).await;
}

#[tokio::test]
async fn test_udp_associate_disabled() {
    let server = TestServer::start(TestConfigBuilder::new().build()).await;
    let mut stream = server.connect().await;

    negotiate_no_auth(&mut stream).await;
    let reply = send_request(&mut stream, &socks5_mock::udp_associate()).await;

    assert_eq!(reply[1], SOCKS5_REPLY_COMMAND_NOT_SUPPORTED);
    assert_closed(&mut stream).await;
}

#[tokio::test]
async fn test_udp_associate_echo() {
    let echo = spawn_udp_echo().await;
    let server = TestServer::start(TestConfigBuilder::new().udp(true).build()).await;
    let mut control = server.connect().await;

    negotiate_no_auth(&mut control).await;
    let reply = send_request(&mut control, &socks5_mock::udp_associate()).await;
    assert_eq!(reply[1], SOCKS5_REPLY_SUCCEEDED);
    assert_eq!(&reply[4..8], &[127, 0, 0, 1]);
    assert_eq!(Some(reply_port(&reply)), server.udp_addr.map(|a| a.port()));

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client
        .connect(("127.0.0.1", reply_port(&reply)))
        .await
        .unwrap();

    // Malformed datagram first: dropped, relay keeps going
    client
        .send(&[0, 0, 0, SOCKS5_ADDR_TYPE_DOMAIN, 200, b'x'])
        .await
        .unwrap();
    client
        .send(&socks5_mock::udp_datagram(echo, b"over udp"))
        .await
        .unwrap();

    let mut buf = [0u8; 1024];
    let len = tokio::time::timeout(Duration::from_secs(5), client.recv(&mut buf))
        .await
        .expect("timed out waiting for UDP reply")
        .unwrap();

    assert_eq!(&buf[..4], &[0, 0, 0, SOCKS5_ADDR_TYPE_IPV4]);
    assert_eq!(&buf[4..8], &[127, 0, 0, 1]);
    assert_eq!(&buf[8..10], &echo.port().to_be_bytes());
    assert_eq!(&buf[10..len], b"over udp");
}

#[tokio::test]
async fn test_udp_without_association_is_dropped() {
    let echo = spawn_udp_echo().await;
    let server = TestServer::start(TestConfigBuilder::new().udp(true).build()).await;
    let udp_addr = server.udp_addr.unwrap();

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client.connect(udp_addr).await.unwrap();
    client
        .send(&socks5_mock::udp_datagram(echo, b"nobody asked"))
        .await
        .unwrap();

    let mut buf = [0u8; 64];
    let result = tokio::time::timeout(Duration::from_millis(300), client.recv(&mut buf)).await;
    assert!(result.is_err(), "datagram relayed without an association");
}
