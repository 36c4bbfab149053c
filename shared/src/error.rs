//! Connection failure taxonomy
//!
//! Every failure raised by a role or a session is turned into one of these
//! and delivered on the event channel. Causes are kept as strings so events
//! stay cheap to clone.

use thiserror::Error;

/// Errors reported by listener/initiator roles and sessions
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("Radio is disabled")]
    RadioDisabled,

    #[error("Failed to open listening socket: {0}")]
    BindFailure(String),

    #[error("Accept failed: {0}")]
    AcceptFailure(String),

    #[error("Connect failed: {0}")]
    ConnectFailure(String),

    #[error("Read failed: {0}")]
    ReadFailure(String),

    #[error("Peer closed the connection")]
    PeerClosed,

    #[error("Write failed: {0}")]
    WriteFailure(String),

    #[error("Session cancelled")]
    Cancelled,

    #[error("No active session")]
    NoActiveSession,
}

impl ConnectionError {
    /// Whether this failure ends the session that reported it
    pub fn ends_session(&self) -> bool {
        matches!(
            self,
            ConnectionError::ReadFailure(_) | ConnectionError::PeerClosed | ConnectionError::Cancelled
        )
    }
}
