//! The single "current session" slot owned by the connection manager

use super::session::SessionHandle;
use parking_lot::Mutex;
use std::sync::Arc;

/// Shared reference to the session `send` is routed to.
///
/// Written by role tasks on promotion and by sessions when they end, read by
/// whoever sends.
#[derive(Clone, Default)]
pub struct CurrentSession {
    slot: Arc<Mutex<Option<SessionHandle>>>,
}

impl CurrentSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point at `handle`, returning the session it replaces. The replaced
    /// session keeps running.
    pub fn replace(&self, handle: SessionHandle) -> Option<SessionHandle> {
        self.slot.lock().replace(handle)
    }

    /// The current session, if it is still open
    pub fn get(&self) -> Option<SessionHandle> {
        self.slot
            .lock()
            .as_ref()
            .filter(|handle| !handle.is_closed())
            .cloned()
    }

    /// Clear the slot if it still points at session `id`
    pub fn release(&self, id: u64) -> bool {
        let mut slot = self.slot.lock();
        if slot.as_ref().is_some_and(|handle| handle.id() == id) {
            *slot = None;
            true
        } else {
            false
        }
    }
}
