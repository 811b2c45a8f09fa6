//! Username/password authentication handler
//!
//! Implements RFC 1929 username/password authentication for SOCKS5.

use crate::error::Socks5Error;
use crate::socks::consts::{SOCKS5_AUTH_FAILURE, SOCKS5_AUTH_SUCCESS, SOCKS5_AUTH_VERSION};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fmt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Immutable username to password store
///
/// Lookups are exact byte comparisons; nothing is hashed or normalized.
/// An empty store disables authentication.
#[derive(Clone, Default)]
pub struct Credentials {
    users: HashMap<String, String>,
}

impl Credentials {
    /// Create a store from a username to password map
    pub fn new(users: HashMap<String, String>) -> Self {
        Credentials { users }
    }

    /// Whether no users are configured
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Number of configured users
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Check a username/password pair as received on the wire
    pub fn verify(&self, username: &[u8], password: &[u8]) -> bool {
        std::str::from_utf8(username)
            .ok()
            .and_then(|name| self.users.get(name))
            .map_or(false, |expected| expected.as_bytes() == password)
    }
}

impl From<HashMap<String, String>> for Credentials {
    fn from(users: HashMap<String, String>) -> Self {
        Credentials::new(users)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("users", &self.users.len())
            .finish()
    }
}

/// A decoded username/password sub-negotiation frame
///
/// ```text
/// +----+------+----------+------+----------+
/// |VER | ULEN |  UNAME   | PLEN |  PASSWD  |
/// +----+------+----------+------+----------+
/// | 1  |  1   | 0 to 255 |  1   | 0 to 255 |
/// +----+------+----------+------+----------+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserPassRequest {
    /// Raw username bytes
    pub username: Vec<u8>,
    /// Raw password bytes
    pub password: Vec<u8>,
}

impl UserPassRequest {
    /// Username for log output
    pub fn display_username(&self) -> String {
        String::from_utf8_lossy(&self.username).into_owned()
    }
}

/// Read a username/password frame from the stream
pub async fn read_user_pass_request<S>(stream: &mut S) -> Result<UserPassRequest>
where
    S: AsyncRead + Unpin,
{
    let mut buf = [0u8; 2];
    stream
        .read_exact(&mut buf)
        .await
        .with_context(|| "Failed to read auth header")?;

    let version = buf[0];
    if version != SOCKS5_AUTH_VERSION {
        return Err(Socks5Error::UnsupportedAuthVersion(version).into());
    }

    let mut username = vec![0u8; buf[1] as usize];
    stream
        .read_exact(&mut username)
        .await
        .with_context(|| "Failed to read username")?;

    let password_len = stream
        .read_u8()
        .await
        .with_context(|| "Failed to read password length")?;
    let mut password = vec![0u8; password_len as usize];
    stream
        .read_exact(&mut password)
        .await
        .with_context(|| "Failed to read password")?;

    Ok(UserPassRequest { username, password })
}

/// Username/password authentication handler
pub struct PasswordAuth;

impl PasswordAuth {
    /// Perform username/password authentication
    ///
    /// Server responds:
    /// ```text
    /// +----+--------+
    /// |VER | STATUS |
    /// +----+--------+
    /// | 1  |   1    |
    /// +----+--------+
    /// ```
    ///
    /// A malformed frame aborts without a status byte. Wrong credentials
    /// are answered with the failure status before the error is returned.
    pub async fn authenticate<S>(stream: &mut S, credentials: &Credentials) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let request = read_user_pass_request(stream).await?;

        if credentials.verify(&request.username, &request.password) {
            send_auth_result(stream, SOCKS5_AUTH_SUCCESS).await?;
            tracing::debug!("Authentication successful for user: {}", request.display_username());
            Ok(())
        } else {
            send_auth_result(stream, SOCKS5_AUTH_FAILURE).await?;
            Err(Socks5Error::AuthFailed(request.display_username()).into())
        }
    }
}

/// Send authentication result to client
async fn send_auth_result<S: AsyncWrite + Unpin>(stream: &mut S, status: u8) -> Result<()> {
    stream.write_all(&[SOCKS5_AUTH_VERSION, status]).await?;
    stream.flush().await?;
    Ok(())
}
