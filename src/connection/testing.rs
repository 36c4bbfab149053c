//! In-memory transport with scripted accept/connect outcomes

use crate::transport::{Transport, TransportListener, TransportStream};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use btchat_shared::{PeerAddress, ServiceDescriptor};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};

/// Our end of an in-memory connection
pub struct ScriptedStream {
    inner: DuplexStream,
    peer: PeerAddress,
    fail_writes: Arc<AtomicBool>,
}

impl ScriptedStream {
    /// Flag that makes every write on this stream fail while set
    pub fn write_failures(&self) -> Arc<AtomicBool> {
        self.fail_writes.clone()
    }
}

/// Create a connected pair: the stream handed to the node and the remote end
pub fn pair(peer: &str) -> (ScriptedStream, DuplexStream) {
    let (local, remote) = tokio::io::duplex(64 * 1024);
    let stream = ScriptedStream {
        inner: local,
        peer: PeerAddress::from(peer),
        fail_writes: Arc::new(AtomicBool::new(false)),
    };
    (stream, remote)
}

impl AsyncRead for ScriptedStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for ScriptedStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "scripted write failure",
            )));
        }
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

impl TransportStream for ScriptedStream {
    fn peer(&self) -> PeerAddress {
        self.peer.clone()
    }
}

/// Outcome of one accept or connect call. An empty script blocks forever.
pub enum Step {
    Peer(ScriptedStream),
    Fail(&'static str),
}

type Script = Arc<Mutex<VecDeque<Step>>>;

fn next_step(script: &Script) -> Option<Result<ScriptedStream, &'static str>> {
    let step = script.lock().pop_front();
    match step {
        Some(Step::Peer(stream)) => Some(Ok(stream)),
        Some(Step::Fail(reason)) => Some(Err(reason)),
        None => None,
    }
}

#[derive(Default)]
pub struct ScriptedTransport {
    bind_error: Option<&'static str>,
    accepts: Script,
    connects: Script,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_bind(mut self, reason: &'static str) -> Self {
        self.bind_error = Some(reason);
        self
    }

    pub fn on_accept(self, step: Step) -> Self {
        self.accepts.lock().push_back(step);
        self
    }

    pub fn on_connect(self, step: Step) -> Self {
        self.connects.lock().push_back(step);
        self
    }
}

pub struct ScriptedListener {
    accepts: Script,
}

#[async_trait]
impl TransportListener for ScriptedListener {
    type Stream = ScriptedStream;

    async fn accept(&mut self) -> io::Result<Self::Stream> {
        match next_step(&self.accepts) {
            Some(Ok(stream)) => Ok(stream),
            Some(Err(reason)) => Err(io::Error::new(io::ErrorKind::ConnectionAborted, reason)),
            None => std::future::pending().await,
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    type Stream = ScriptedStream;
    type Listener = ScriptedListener;

    async fn listen(&self, _service: &ServiceDescriptor) -> Result<Self::Listener> {
        if let Some(reason) = self.bind_error {
            return Err(anyhow!(reason));
        }
        Ok(ScriptedListener {
            accepts: self.accepts.clone(),
        })
    }

    async fn connect(
        &self,
        _service: &ServiceDescriptor,
        _peer: &PeerAddress,
    ) -> Result<Self::Stream> {
        match next_step(&self.connects) {
            Some(Ok(stream)) => Ok(stream),
            Some(Err(reason)) => Err(anyhow!(reason)),
            None => std::future::pending().await,
        }
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}
