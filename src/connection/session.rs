//! A promoted connection: background read loop plus a shared writer

use super::current::CurrentSession;
use super::events::EventSender;
use crate::transport::TransportStream;
use btchat_shared::{ConnectionError, ConnectionEvent, PeerAddress, Role};
use bytes::Bytes;
use std::fmt;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Open,
    /// Cancel requested; the read loop is releasing the socket
    Closing,
    /// Socket released and read loop ended
    Closed,
}

/// State shared between a session's read loop and its handles
struct SessionShared {
    id: u64,
    role: Role,
    peer: PeerAddress,
    /// Output side of the socket; `None` once the socket is released
    writer: Mutex<Option<BoxedWriter>>,
    state: watch::Sender<SessionState>,
    events: EventSender,
}

impl SessionShared {
    fn is_closed(&self) -> bool {
        *self.state.borrow() != SessionState::Open
    }

    /// Close the output side; the session no longer accepts writes
    async fn release(&self) {
        self.state.send_if_modified(|state| {
            let open = *state == SessionState::Open;
            if open {
                *state = SessionState::Closing;
            }
            open
        });
        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            if let Err(e) = writer.shutdown().await {
                debug!("[SESSION {}] Shutdown error: {}", self.id, e);
            }
        }
    }
}

/// Cloneable handle to a running session
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<SessionShared>,
}

impl SessionHandle {
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// Role that produced this session
    pub fn role(&self) -> Role {
        self.shared.role
    }

    pub fn peer(&self) -> &PeerAddress {
        &self.shared.peer
    }

    /// Write `bytes` to the peer.
    ///
    /// A failed write is reported on the event channel and returned, but does
    /// not end the session; the read loop keeps running. Reports never wait
    /// for room on the event channel. A write still pending when the session
    /// starts closing is abandoned.
    pub async fn send(&self, bytes: &[u8]) -> Result<(), ConnectionError> {
        let mut state = self.shared.state.subscribe();
        let mut writer = self.shared.writer.lock().await;
        let writer_ref = match writer.as_mut() {
            Some(w) if !self.shared.is_closed() => w,
            _ => return Err(session_closed()),
        };

        let result = tokio::select! {
            biased;
            _ = closing(&mut state) => return Err(session_closed()),
            result = write_flushed(writer_ref, bytes) => result,
        };

        // Reported under the writer lock so the socket cannot be released,
        // and the terminal event queued, ahead of this report
        let outcome = match result {
            Ok(()) => {
                debug!("[SESSION {}] Sent {} bytes", self.shared.id, bytes.len());
                self.shared.events.try_emit(ConnectionEvent::DataSent {
                    length: bytes.len(),
                });
                Ok(())
            }
            Err(e) => {
                warn!("[SESSION {}] Write failed: {}", self.shared.id, e);
                let cause = ConnectionError::WriteFailure(e.to_string());
                self.shared.events.try_emit(ConnectionEvent::ConnectionFailed {
                    role: self.shared.role,
                    cause: cause.clone(),
                });
                Err(cause)
            }
        };
        drop(writer);
        outcome
    }

    /// Close the socket. A blocked read fails and the read loop exits through
    /// its normal error path. Idempotent.
    pub fn cancel(&self) {
        let requested = self.shared.state.send_if_modified(|state| {
            let open = *state == SessionState::Open;
            if open {
                *state = SessionState::Closing;
            }
            open
        });
        if requested {
            debug!("[SESSION {}] Cancel requested", self.shared.id);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Wait until the socket is released and the read loop has ended
    pub async fn closed(&self) {
        let mut rx = self.shared.state.subscribe();
        let _ = rx.wait_for(|state| *state == SessionState::Closed).await;
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.shared.id)
            .field("role", &self.shared.role)
            .field("peer", &self.shared.peer)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// A connected socket owned by one session.
///
/// The read loop is the only reader of the socket and `send` the only writer.
pub struct Session<S: TransportStream> {
    shared: Arc<SessionShared>,
    reader: ReadHalf<S>,
    buffer_size: usize,
}

impl<S: TransportStream> Session<S> {
    /// Take ownership of a connected stream
    pub fn new(
        id: u64,
        role: Role,
        stream: S,
        events: EventSender,
        buffer_size: usize,
    ) -> Self {
        let peer = stream.peer();
        let (reader, writer) = tokio::io::split(stream);
        let writer: BoxedWriter = Box::new(writer);
        let (state, _) = watch::channel(SessionState::Open);

        Self {
            shared: Arc::new(SessionShared {
                id,
                role,
                peer,
                writer: Mutex::new(Some(writer)),
                state,
                events,
            }),
            reader,
            buffer_size,
        }
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            shared: self.shared.clone(),
        }
    }

    /// Spawn the read loop. When it ends, `current` is cleared if it still
    /// points at this session.
    pub fn start(self, current: Option<CurrentSession>) -> SessionHandle {
        let handle = self.handle();
        tokio::spawn(read_loop(self.shared, self.reader, self.buffer_size, current));
        handle
    }
}

fn session_closed() -> ConnectionError {
    ConnectionError::WriteFailure("session closed".into())
}

async fn write_flushed(writer: &mut BoxedWriter, bytes: &[u8]) -> io::Result<()> {
    writer.write_all(bytes).await?;
    writer.flush().await
}

/// Resolve once the session leaves the open state
async fn closing(rx: &mut watch::Receiver<SessionState>) {
    let _ = rx.wait_for(|state| *state != SessionState::Open).await;
}

async fn read_loop<S: TransportStream>(
    shared: Arc<SessionShared>,
    mut reader: ReadHalf<S>,
    buffer_size: usize,
    current: Option<CurrentSession>,
) {
    let mut buf = vec![0u8; buffer_size.max(1)];
    let mut state = shared.state.subscribe();
    info!(
        "[SESSION {}] Reading from {} ({})",
        shared.id, shared.peer, shared.role
    );

    let cause = loop {
        tokio::select! {
            biased;
            _ = closing(&mut state) => break ConnectionError::Cancelled,
            result = reader.read(&mut buf) => match result {
                Ok(0) => break ConnectionError::PeerClosed,
                Ok(n) => {
                    // Each event owns its bytes; the buffer is reused
                    let event = ConnectionEvent::DataReceived {
                        bytes: Bytes::copy_from_slice(&buf[..n]),
                        length: n,
                    };
                    // A full event channel must not hold off cancel
                    tokio::select! {
                        biased;
                        _ = closing(&mut state) => break ConnectionError::Cancelled,
                        _ = shared.events.emit(event) => {}
                    }
                }
                Err(e) => break ConnectionError::ReadFailure(e.to_string()),
            },
        }
    };

    shared.release().await;
    drop(reader);
    shared.state.send_replace(SessionState::Closed);
    if let Some(current) = current {
        if current.release(shared.id) {
            debug!("[SESSION {}] No longer current", shared.id);
        }
    }

    info!("[SESSION {}] Ended: {}", shared.id, cause);
    shared
        .events
        .emit(ConnectionEvent::ConnectionFailed {
            role: shared.role,
            cause,
        })
        .await;
}
