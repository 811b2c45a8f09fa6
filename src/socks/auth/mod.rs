//! SOCKS5 authentication module
//!
//! Handles authentication method negotiation and username/password
//! authentication.

mod password;

pub use password::{read_user_pass_request, Credentials, PasswordAuth, UserPassRequest};

use super::consts::*;
use crate::error::Socks5Error;
use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

/// Authentication method types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    /// No authentication required
    None,
    /// Username/password authentication
    Password,
}

impl AuthMethod {
    /// Convert to SOCKS5 method byte
    pub fn to_byte(self) -> u8 {
        match self {
            AuthMethod::None => SOCKS5_AUTH_METHOD_NONE,
            AuthMethod::Password => SOCKS5_AUTH_METHOD_PASSWORD,
        }
    }
}

/// Negotiation progress of one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    /// Waiting for the client's method list
    AwaitingMethods,
    /// A method was selected and sent to the client
    MethodChosen(AuthMethod),
    /// Waiting for the username/password frame
    AwaitingCredentials,
    /// The client may send its request
    Authenticated,
    /// The connection must be closed
    Rejected,
}

/// Select the authentication method based on the credential store
///
/// With users configured only username/password is acceptable; without
/// users only "no authentication" is.
pub fn select_auth_method(methods: &[u8], credentials: &Credentials) -> Option<AuthMethod> {
    let wanted = if credentials.is_empty() {
        AuthMethod::None
    } else {
        AuthMethod::Password
    };

    methods.contains(&wanted.to_byte()).then_some(wanted)
}

/// Read the client's greeting and return its method list
///
/// ```text
/// +----+----------+----------+
/// |VER | NMETHODS | METHODS  |
/// +----+----------+----------+
/// | 1  |    1     | 0 to 255 |
/// +----+----------+----------+
/// ```
pub async fn read_method_request<S>(stream: &mut S) -> Result<Vec<u8>>
where
    S: AsyncRead + Unpin,
{
    let mut buf = [0u8; 2];
    stream
        .read_exact(&mut buf)
        .await
        .with_context(|| "Failed to read handshake header")?;

    let version = buf[0];
    if version != SOCKS5_VERSION {
        return Err(Socks5Error::UnsupportedVersion(version).into());
    }

    let mut methods = vec![0u8; buf[1] as usize];
    stream
        .read_exact(&mut methods)
        .await
        .with_context(|| "Failed to read authentication methods")?;

    Ok(methods)
}

/// Per-connection authentication state machine
#[derive(Debug)]
pub struct Authenticator<'a> {
    credentials: &'a Credentials,
    state: AuthState,
}

impl<'a> Authenticator<'a> {
    /// Create a negotiator in the `AwaitingMethods` state
    pub fn new(credentials: &'a Credentials) -> Self {
        Authenticator {
            credentials,
            state: AuthState::AwaitingMethods,
        }
    }

    /// Current state
    pub fn state(&self) -> AuthState {
        self.state
    }

    fn transition(&mut self, next: AuthState) {
        trace!("Auth state {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Run method selection and, if chosen, the username/password exchange
    ///
    /// Errors leave the state machine in `Rejected` (or where a malformed
    /// frame interrupted it); the caller closes the connection either way.
    pub async fn run<S>(&mut self, stream: &mut S) -> Result<AuthMethod>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let methods = read_method_request(stream).await?;
        let selected = select_auth_method(&methods, self.credentials);

        stream
            .write_all(&[
                SOCKS5_VERSION,
                selected
                    .map(AuthMethod::to_byte)
                    .unwrap_or(SOCKS5_AUTH_METHOD_NOT_ACCEPTABLE),
            ])
            .await?;
        stream.flush().await?;

        let method = match selected {
            Some(method) => method,
            None => {
                self.transition(AuthState::Rejected);
                return Err(Socks5Error::NoAcceptableMethod.into());
            }
        };
        self.transition(AuthState::MethodChosen(method));

        if method == AuthMethod::Password {
            self.transition(AuthState::AwaitingCredentials);
            if let Err(e) = PasswordAuth::authenticate(stream, self.credentials).await {
                self.transition(AuthState::Rejected);
                return Err(e);
            }
        }

        self.transition(AuthState::Authenticated);
        Ok(method)
    }
}

/// Perform authentication negotiation and authentication
///
/// This function handles the complete SOCKS5 authentication flow:
/// 1. Read client's supported methods
/// 2. Select the method the credential store calls for
/// 3. Perform authentication if required
pub async fn authenticate<S>(stream: &mut S, credentials: &Credentials) -> Result<AuthMethod>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    Authenticator::new(credentials).run(stream).await
}
