//! RFCOMM transport implementation for Bluetooth connections

use crate::transport::traits::{Transport, TransportListener, TransportStream};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bluer::rfcomm::{Profile, ProfileHandle, Role as ProfileRole, Stream as RfcommStream};
use bluer::{Adapter, Address};
use btchat_shared::{PeerAddress, ServiceDescriptor};
use futures::StreamExt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::{debug, info};

/// RFCOMM stream wrapper implementing TransportStream
pub struct RfcommTransportStream {
    inner: RfcommStream,
    peer_addr: Address,
    /// Client profile registration, released together with the stream
    _profile: Option<ProfileHandle>,
}

impl RfcommTransportStream {
    /// Create a new RFCOMM transport stream
    pub fn new(stream: RfcommStream, peer_addr: Address) -> Self {
        Self {
            inner: stream,
            peer_addr,
            _profile: None,
        }
    }
}

impl AsyncRead for RfcommTransportStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for RfcommTransportStream {
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

impl TransportStream for RfcommTransportStream {
    fn peer(&self) -> PeerAddress {
        PeerAddress::new(self.peer_addr.to_string())
    }
}

/// Server profile registered with BlueZ; yields one stream per incoming peer
pub struct RfcommTransportListener {
    handle: ProfileHandle,
}

#[async_trait]
impl TransportListener for RfcommTransportListener {
    type Stream = RfcommTransportStream;

    async fn accept(&mut self) -> io::Result<Self::Stream> {
        let request = self.handle.next().await.ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotConnected, "RFCOMM profile unregistered")
        })?;
        let peer_addr = request.device();
        debug!("[BT] Incoming connection from {}", peer_addr);

        let stream = request
            .accept()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        Ok(RfcommTransportStream::new(stream, peer_addr))
    }
}

/// RFCOMM transport backed by the default BlueZ adapter
pub struct RfcommTransport {
    session: bluer::Session,
    adapter: Adapter,
    channel: u8,
}

impl RfcommTransport {
    /// Open a BlueZ session on the default adapter
    pub async fn new(channel: u8) -> Result<Self> {
        let session = bluer::Session::new().await?;
        let adapter = session.default_adapter().await?;
        info!("[BT] Using adapter {}", adapter.name());

        Ok(Self {
            session,
            adapter,
            channel,
        })
    }

    /// The adapter this transport opens sockets on
    pub fn adapter(&self) -> Adapter {
        self.adapter.clone()
    }

    fn profile(&self, service: &ServiceDescriptor, role: ProfileRole) -> Profile {
        Profile {
            uuid: service.uuid,
            name: Some(service.name.clone()),
            role: Some(role),
            channel: match role {
                ProfileRole::Server => Some(self.channel.into()),
                _ => None,
            },
            require_authentication: Some(false),
            require_authorization: Some(false),
            auto_connect: Some(false),
            ..Default::default()
        }
    }
}

#[async_trait]
impl Transport for RfcommTransport {
    type Stream = RfcommTransportStream;
    type Listener = RfcommTransportListener;

    async fn listen(&self, service: &ServiceDescriptor) -> Result<Self::Listener> {
        let handle = self
            .session
            .register_profile(self.profile(service, ProfileRole::Server))
            .await
            .map_err(|e| anyhow!("RFCOMM profile registration failed: {}", e))?;

        info!("[BT] Advertising {} on channel {}", service, self.channel);
        Ok(RfcommTransportListener { handle })
    }

    async fn connect(
        &self,
        service: &ServiceDescriptor,
        peer: &PeerAddress,
    ) -> Result<Self::Stream> {
        let target_addr: Address = peer
            .as_str()
            .parse()
            .map_err(|e| anyhow!("Invalid Bluetooth address {}: {}", peer, e))?;

        let mut handle = self
            .session
            .register_profile(self.profile(service, ProfileRole::Client))
            .await
            .map_err(|e| anyhow!("RFCOMM profile registration failed: {}", e))?;
        let device = self.adapter.device(target_addr)?;

        info!("[BT] Connecting to {} for {}", target_addr, service);

        // BlueZ resolves the service record and hands the socket to our profile
        let early = tokio::select! {
            res = device.connect_profile(&service.uuid) => {
                res.map_err(|e| anyhow!("RFCOMM connect failed: {}", e))?;
                None
            }
            request = handle.next() => Some(request),
        };
        let request = match early {
            Some(request) => request,
            None => handle.next().await,
        }
        .ok_or_else(|| anyhow!("RFCOMM profile closed before {} connected", target_addr))?;

        let stream = request
            .accept()
            .map_err(|e| anyhow!("RFCOMM connect failed: {}", e))?;

        info!("[BT] Connected to {}", target_addr);
        Ok(RfcommTransportStream {
            inner: stream,
            peer_addr: target_addr,
            _profile: Some(handle),
        })
    }

    fn name(&self) -> &'static str {
        "Bluetooth"
    }
}
