use protocol::ProtocolError;
use std::time::Duration;
use thiserror::Error;

/// Failures of an RCON session.
///
/// `Connect`, `ConnectTimeout` and `Auth` can only happen while a session is
/// being opened. `Protocol` covers framing and transport failures and is
/// fatal to the session it happens in.
#[derive(Debug, Error)]
pub enum RconError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("connection to {addr} timed out after {timeout:?}")]
    ConnectTimeout { addr: String, timeout: Duration },
    #[error("authentication rejected")]
    Auth,
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl RconError {
    /// True when the transport could not be established
    pub fn is_connect(&self) -> bool {
        matches!(self, Self::Connect { .. } | Self::ConnectTimeout { .. })
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth)
    }
}
