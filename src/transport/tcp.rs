//! TCP transport used to simulate the radio during development

use crate::transport::traits::{Transport, TransportListener, TransportStream};
use anyhow::{Context as _, Result};
use async_trait::async_trait;
use btchat_shared::{PeerAddress, ServiceDescriptor};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tracing::debug;

/// TCP stream wrapper implementing TransportStream
pub struct TcpTransportStream {
    inner: TcpStream,
    peer_addr: PeerAddress,
}

impl TcpTransportStream {
    pub fn new(stream: TcpStream, peer_addr: PeerAddress) -> Self {
        Self {
            inner: stream,
            peer_addr,
        }
    }
}

impl AsyncRead for TcpTransportStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for TcpTransportStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

impl TransportStream for TcpTransportStream {
    fn peer(&self) -> PeerAddress {
        self.peer_addr.clone()
    }
}

/// Listening TCP socket
pub struct TcpTransportListener {
    inner: TcpListener,
}

impl TcpTransportListener {
    /// Address the socket is bound to
    #[cfg(test)]
    pub fn local_addr(&self) -> io::Result<std::net::SocketAddr> {
        self.inner.local_addr()
    }
}

#[async_trait]
impl TransportListener for TcpTransportListener {
    type Stream = TcpTransportStream;

    async fn accept(&mut self) -> io::Result<Self::Stream> {
        let (stream, addr) = self.inner.accept().await?;
        Ok(TcpTransportStream::new(stream, PeerAddress::new(addr.to_string())))
    }
}

/// TCP transport. Listening binds `address`; peers are `host:port` strings.
pub struct TcpTransport {
    address: String,
}

impl TcpTransport {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    type Stream = TcpTransportStream;
    type Listener = TcpTransportListener;

    async fn listen(&self, service: &ServiceDescriptor) -> Result<Self::Listener> {
        let listener = TcpListener::bind(&self.address)
            .await
            .with_context(|| format!("binding {} for {}", self.address, service.name))?;
        debug!("[TCP] Bound {}", listener.local_addr()?);
        Ok(TcpTransportListener { inner: listener })
    }

    async fn connect(
        &self,
        _service: &ServiceDescriptor,
        peer: &PeerAddress,
    ) -> Result<Self::Stream> {
        let stream = TcpStream::connect(peer.as_str())
            .await
            .with_context(|| format!("connecting to {}", peer))?;
        Ok(TcpTransportStream::new(stream, peer.clone()))
    }

    fn name(&self) -> &'static str {
        "TCP simulation"
    }
}
