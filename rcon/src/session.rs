//! RCON session: one authenticated connection to one server
//!
//! A session walks `Disconnected → Connecting → Authenticating → Ready` and
//! ends in `Closed`, or in `Failed` from any state when the transport, the
//! framing or the credentials let it down. The transport is owned by the
//! session and released exactly once, whichever transition failed.

use crate::error::RconError;
use log::{debug, warn};
use protocol::{read_packet, write_packet, Packet, PacketType, ProtocolError};
use std::fmt;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Default bound on establishing the TCP connection
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Default bound on each packet write and read
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(10);

/// Byte stream a session can run over.
///
/// Implemented for anything readable, writable and sendable, which covers
/// `TcpStream` as well as in-memory streams used in tests.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Transport for T {}

/// Where and how to reach one RCON endpoint
#[derive(Clone)]
pub struct RconConfig {
    pub host: String,
    pub port: u16,
    pub password: String,
    pub connect_timeout: Duration,
    pub io_timeout: Duration,
}

impl RconConfig {
    pub fn new(host: impl Into<String>, port: u16, password: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            password: password.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            io_timeout: DEFAULT_IO_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn with_io_timeout(mut self, io_timeout: Duration) -> Self {
        self.io_timeout = io_timeout;
        self
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// The password must never end up in logs.
impl fmt::Debug for RconConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RconConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("password", &"<redacted>")
            .field("connect_timeout", &self.connect_timeout)
            .field("io_timeout", &self.io_timeout)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Authenticating,
    Ready,
    Closed,
    Failed,
}

pub struct RconSession {
    address: String,
    io_timeout: Duration,
    state: SessionState,
    next_request_id: i32,
    transport: Option<Box<dyn Transport>>,
}

impl fmt::Debug for RconSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RconSession")
            .field("address", &self.address)
            .field("state", &self.state)
            .field("next_request_id", &self.next_request_id)
            .finish_non_exhaustive()
    }
}

impl RconSession {
    /// Connects to the configured endpoint and authenticates.
    ///
    /// Returns a session in the `Ready` state. Any failure releases the
    /// connection before the error is returned.
    pub async fn open(config: &RconConfig) -> Result<Self, RconError> {
        let mut session = Self::new(config);
        session.connect(config.connect_timeout).await?;
        session.authenticate(&config.password).await?;
        Ok(session)
    }

    /// Authenticates over an already established transport.
    pub async fn with_transport<T>(transport: T, config: &RconConfig) -> Result<Self, RconError>
    where
        T: Transport + 'static,
    {
        let mut session = Self::new(config);
        session.transport = Some(Box::new(transport));
        session.state = SessionState::Authenticating;
        session.authenticate(&config.password).await?;
        Ok(session)
    }

    fn new(config: &RconConfig) -> Self {
        Self {
            address: config.address(),
            io_timeout: config.io_timeout,
            state: SessionState::Disconnected,
            next_request_id: 1,
            transport: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready
    }

    async fn connect(&mut self, connect_timeout: Duration) -> Result<(), RconError> {
        self.state = SessionState::Connecting;
        debug!("Connecting to RCON at {}", self.address);

        match timeout(connect_timeout, TcpStream::connect(&self.address)).await {
            Ok(Ok(stream)) => {
                // Commands are tiny; don't let Nagle hold them back
                let _ = stream.set_nodelay(true);
                self.transport = Some(Box::new(stream));
                self.state = SessionState::Authenticating;
                Ok(())
            }
            Ok(Err(source)) => {
                self.fail();
                Err(RconError::Connect {
                    addr: self.address.clone(),
                    source,
                })
            }
            Err(_) => {
                self.fail();
                Err(RconError::ConnectTimeout {
                    addr: self.address.clone(),
                    timeout: connect_timeout,
                })
            }
        }
    }

    async fn authenticate(&mut self, password: &str) -> Result<(), RconError> {
        let request_id = match self.take_request_id() {
            Ok(id) => id,
            Err(e) => {
                self.fail();
                return Err(e.into());
            }
        };
        let request = Packet::new(request_id, PacketType::AUTH, password);
        debug!("Authenticating with {} (request {})", self.address, request.request_id);

        let response = match self.exchange(&request).await {
            Ok(response) => response,
            Err(e) => {
                self.fail();
                return Err(e.into());
            }
        };

        if response.is_auth_failure() {
            warn!("RCON authentication rejected by {}", self.address);
            self.fail();
            return Err(RconError::Auth);
        }

        self.state = SessionState::Ready;
        debug!("Authenticated with {}", self.address);
        Ok(())
    }

    /// Runs one command and returns the body of the single response packet.
    ///
    /// Responses spanning several packets are truncated to the first one.
    /// A failure here is fatal: the session moves to `Failed` and every later
    /// call reports `not connected`.
    pub async fn execute_command(&mut self, command: &str) -> Result<String, RconError> {
        if self.state != SessionState::Ready {
            return Err(ProtocolError::NotConnected.into());
        }

        let request_id = match self.take_request_id() {
            Ok(id) => id,
            Err(e) => {
                self.fail();
                return Err(e.into());
            }
        };
        let request = Packet::new(request_id, PacketType::EXEC_COMMAND, command);
        debug!(
            "Executing '{}' on {} (request {})",
            command, self.address, request.request_id
        );

        match self.exchange(&request).await {
            Ok(response) => {
                if response.request_id != request.request_id {
                    debug!(
                        "Response id {} does not match request {} on {}",
                        response.request_id, request.request_id, self.address
                    );
                }
                Ok(response.body_text())
            }
            Err(e) => {
                self.fail();
                Err(e.into())
            }
        }
    }

    /// Shuts the connection down. Safe to call more than once.
    pub async fn close(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            let _ = timeout(self.io_timeout, transport.shutdown()).await;
            debug!("Closed RCON session with {}", self.address);
        }
        self.state = SessionState::Closed;
    }

    async fn exchange(&mut self, request: &Packet) -> Result<Packet, ProtocolError> {
        let io_timeout = self.io_timeout;
        let transport = self.transport.as_mut().ok_or(ProtocolError::NotConnected)?;

        timeout(io_timeout, write_packet(transport, request))
            .await
            .map_err(|_| ProtocolError::Timeout(io_timeout))??;

        timeout(io_timeout, read_packet(transport))
            .await
            .map_err(|_| ProtocolError::Timeout(io_timeout))?
    }

    /// Ids run from 1 to `i32::MAX` and are never reused within a session;
    /// -1 is reserved for auth rejection.
    fn take_request_id(&mut self) -> Result<i32, ProtocolError> {
        let id = self.next_request_id;
        if id < 1 {
            return Err(ProtocolError::RequestIdsExhausted);
        }
        self.next_request_id = id.wrapping_add(1);
        Ok(id)
    }

    fn fail(&mut self) {
        self.transport = None;
        self.state = SessionState::Failed;
    }
}
