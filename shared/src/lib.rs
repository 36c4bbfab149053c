//! Bluetooth Chat Shared Types
//!
//! This crate provides the vocabulary shared by the chat node and the
//! development peer: service descriptors, peer addresses, connection roles
//! and the events reported to the consumer of a session.

pub mod error;

use bytes::Bytes;
use std::fmt;
use uuid::Uuid;

pub use error::ConnectionError;

/// Default parameters for the chat service
pub mod defaults {
    use uuid::Uuid;

    /// Service name advertised by the listener
    pub const SERVICE_NAME: &str = "Bluetooth Chat";

    /// Service UUID shared by listener and initiator
    pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x5afc04a6_9c91_49d2_9271_ecf35d2f7158);

    /// RFCOMM channel the listener binds to
    pub const RFCOMM_CHANNEL: u8 = 1;

    /// Size of the buffer each session reads into
    pub const READ_BUFFER_SIZE: usize = 1024;

    /// Accept attempts before a listener gives up (one automatic retry)
    pub const ACCEPT_ATTEMPTS: u32 = 2;

    /// Capacity of the event channel
    pub const EVENT_CAPACITY: usize = 100;

    /// Address used when the radio is simulated over TCP
    pub const TCP_SIMULATION_ADDRESS: &str = "127.0.0.1:9000";
}

/// Identifies the service a listener offers and an initiator targets
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceDescriptor {
    pub name: String,
    pub uuid: Uuid,
}

impl ServiceDescriptor {
    /// Create a new service descriptor
    pub fn new(name: impl Into<String>, uuid: Uuid) -> Self {
        Self {
            name: name.into(),
            uuid,
        }
    }
}

impl Default for ServiceDescriptor {
    fn default() -> Self {
        Self::new(defaults::SERVICE_NAME, defaults::SERVICE_UUID)
    }
}

impl fmt::Display for ServiceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.uuid)
    }
}

/// Transport-level identifier of a remote endpoint.
///
/// A Bluetooth MAC for RFCOMM, a `host:port` pair for the TCP simulation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerAddress(String);

impl PeerAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PeerAddress {
    fn from(address: &str) -> Self {
        Self::new(address)
    }
}

impl From<String> for PeerAddress {
    fn from(address: String) -> Self {
        Self(address)
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A peer reported by device discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredPeer {
    pub address: PeerAddress,
    /// Display name, if the device advertised one
    pub name: Option<String>,
}

/// Which side of the handshake produced a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Accepted an incoming connection (server)
    Listener,
    /// Opened a connection to a peer (client)
    Initiator,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Listener => write!(f, "Listener"),
            Role::Initiator => write!(f, "Initiator"),
        }
    }
}

/// Lifecycle and data events delivered to the consumer.
///
/// Events carry no reference to the session that produced them; consumers
/// correlate by arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A listener is waiting for a peer
    Connecting { role: Role },
    /// A socket was connected and is being promoted into a session
    Connected { role: Role, peer: PeerAddress },
    /// A role or session failed
    ConnectionFailed { role: Role, cause: ConnectionError },
    /// Bytes read from the peer, exactly as one read returned them
    DataReceived { bytes: Bytes, length: usize },
    /// Bytes written to the peer
    DataSent { length: usize },
}

impl ConnectionEvent {
    /// Whether this event is the last one a session emits
    pub fn is_session_end(&self) -> bool {
        matches!(self, ConnectionEvent::ConnectionFailed { cause, .. } if cause.ends_session())
    }
}
