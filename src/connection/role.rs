//! Shared machinery for the listener and initiator roles

use super::current::CurrentSession;
use super::events::EventSender;
use super::session::{Session, SessionHandle};
use crate::transport::{RadioControl, Transport, TransportStream};
use btchat_shared::{ConnectionError, ConnectionEvent, Role};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Resolve once `rx` has been set to `true`.
///
/// If the sending side goes away without setting it, this never resolves.
pub(crate) async fn cancelled(rx: &mut watch::Receiver<bool>) {
    let set = rx.wait_for(|flag| *flag).await.is_ok();
    if !set {
        std::future::pending::<()>().await;
    }
}

/// Everything a role needs to promote a socket into the current session
pub(crate) struct RoleContext<T: Transport> {
    pub transport: Arc<T>,
    pub radio: Arc<dyn RadioControl>,
    pub events: EventSender,
    pub current: CurrentSession,
    pub session_ids: Arc<AtomicU64>,
    pub read_buffer_size: usize,
}

impl<T: Transport> Clone for RoleContext<T> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            radio: self.radio.clone(),
            events: self.events.clone(),
            current: self.current.clone(),
            session_ids: self.session_ids.clone(),
            read_buffer_size: self.read_buffer_size,
        }
    }
}

impl<T: Transport> RoleContext<T> {
    /// Report `RadioDisabled` and return false if the radio is off
    pub async fn radio_ready(&self, role: Role) -> bool {
        if self.radio.is_enabled().await {
            return true;
        }
        error!("[{}] Radio is disabled", role);
        self.fail(role, ConnectionError::RadioDisabled).await;
        false
    }

    pub async fn fail(&self, role: Role, cause: ConnectionError) {
        self.events
            .emit(ConnectionEvent::ConnectionFailed { role, cause })
            .await;
    }

    /// Turn a connected socket into the current session and start reading
    pub async fn promote(&self, role: Role, stream: T::Stream) -> SessionHandle {
        self.radio.cancel_discovery().await;

        let peer = stream.peer();
        let id = self.session_ids.fetch_add(1, Ordering::SeqCst) + 1;
        let session = Session::new(id, role, stream, self.events.clone(), self.read_buffer_size);
        // Sends are routable by the time the consumer sees Connected
        if let Some(previous) = self.current.replace(session.handle()) {
            debug!(
                "[{}] Session {} replaces session {}",
                role,
                id,
                previous.id()
            );
        }

        info!("[{}] Connected to {}", role, peer);
        self.events
            .emit(ConnectionEvent::Connected { role, peer })
            .await;
        session.start(Some(self.current.clone()))
    }
}

/// Handle to a running listener or initiator
pub struct RoleHandle {
    role: Role,
    cancel: watch::Sender<bool>,
    task: JoinHandle<Option<SessionHandle>>,
}

impl RoleHandle {
    /// Run `body` on its own task, handing it the cancellation signal
    pub(crate) fn spawn<F, Fut>(role: Role, body: F) -> Self
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut,
        Fut: Future<Output = Option<SessionHandle>> + Send + 'static,
    {
        let (cancel, cancel_rx) = watch::channel(false);
        let task = tokio::spawn(body(cancel_rx));
        Self { role, cancel, task }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Close the socket the role is blocked on. The role ends without
    /// reporting a failure. Has no effect once a session was promoted.
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the role to end, yielding the session it promoted
    pub async fn join(self) -> Option<SessionHandle> {
        match self.task.await {
            Ok(session) => session,
            Err(e) => {
                error!("[{}] Role task failed: {}", self.role, e);
                None
            }
        }
    }
}
