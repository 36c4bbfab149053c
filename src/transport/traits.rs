//! Transport trait abstraction for pluggable socket backends

use anyhow::Result;
use async_trait::async_trait;
use btchat_shared::{PeerAddress, ServiceDescriptor};
use std::io;
use tokio::io::{AsyncRead, AsyncWrite};

/// A connected byte stream to a single peer
pub trait TransportStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {
    /// Address of the remote end
    fn peer(&self) -> PeerAddress;
}

/// A socket bound in listening mode. Dropping it closes the socket.
#[async_trait]
pub trait TransportListener: Send + 'static {
    /// The stream type produced by accepted connections
    type Stream: TransportStream;

    /// Wait for the next incoming connection
    async fn accept(&mut self) -> io::Result<Self::Stream>;
}

/// Factory for listening and connected sockets
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// The stream type this transport produces
    type Stream: TransportStream;

    /// The listening socket type
    type Listener: TransportListener<Stream = Self::Stream>;

    /// Bind a listening socket offering `service`
    async fn listen(&self, service: &ServiceDescriptor) -> Result<Self::Listener>;

    /// Open a stream to `service` on `peer`
    async fn connect(&self, service: &ServiceDescriptor, peer: &PeerAddress)
        -> Result<Self::Stream>;

    /// Human-readable name for this transport
    fn name(&self) -> &'static str;
}
