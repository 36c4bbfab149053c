//! Event channel between background roles/sessions and the consumer

use btchat_shared::ConnectionEvent;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{trace, warn};

/// Create an event channel with the given capacity
pub fn channel(capacity: usize) -> (EventSender, mpsc::Receiver<ConnectionEvent>) {
    let (tx, rx) = mpsc::channel(capacity);
    (EventSender { tx }, rx)
}

/// Producer side of the event channel, shared by roles and sessions
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::Sender<ConnectionEvent>,
}

impl EventSender {
    /// Deliver an event in order. A consumer that went away is not an error.
    pub async fn emit(&self, event: ConnectionEvent) {
        trace!(?event, "emit");
        let _ = self.tx.send(event).await;
    }

    /// Queue an event without waiting for room.
    ///
    /// Used on paths driven by the consumer itself, which cannot wait on its
    /// own channel. Returns false if the event was dropped.
    pub fn try_emit(&self, event: ConnectionEvent) -> bool {
        trace!(?event, "try_emit");
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                warn!(?event, "Event channel full, dropping event");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}
