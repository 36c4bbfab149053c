//! Radio control: enabled check and discovery cancellation

use async_trait::async_trait;
use bluer::Adapter;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// The part of the radio stack the connection core depends on
#[async_trait]
pub trait RadioControl: Send + Sync {
    /// Whether the radio is powered and usable
    async fn is_enabled(&self) -> bool;

    /// Stop any running device discovery
    async fn cancel_discovery(&self);
}

/// BlueZ adapter radio
pub struct BluerRadio {
    adapter: Adapter,
    /// Scan task started by discovery, if one is running
    scan: Mutex<Option<JoinHandle<()>>>,
}

impl BluerRadio {
    pub fn new(adapter: Adapter) -> Self {
        Self {
            adapter,
            scan: Mutex::new(None),
        }
    }

    /// Track a running scan so `cancel_discovery` can stop it
    pub fn set_scan(&self, scan: JoinHandle<()>) {
        if let Some(previous) = self.scan.lock().replace(scan) {
            previous.abort();
        }
    }
}

#[async_trait]
impl RadioControl for BluerRadio {
    async fn is_enabled(&self) -> bool {
        match self.adapter.is_powered().await {
            Ok(powered) => powered,
            Err(e) => {
                debug!("[BT] Could not query adapter power: {}", e);
                false
            }
        }
    }

    async fn cancel_discovery(&self) {
        let scan = self.scan.lock().take();
        if let Some(scan) = scan {
            if !scan.is_finished() {
                info!("[BT] Cancelling discovery");
            }
            scan.abort();
        }
    }
}

/// Radio stand-in for the TCP simulation
#[derive(Debug)]
pub struct SimulatedRadio {
    enabled: AtomicBool,
    cancellations: AtomicUsize,
}

impl SimulatedRadio {
    pub fn new() -> Self {
        Self {
            enabled: AtomicBool::new(true),
            cancellations: AtomicUsize::new(0),
        }
    }

    #[cfg(test)]
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Number of times discovery was cancelled
    #[cfg(test)]
    pub fn cancellations(&self) -> usize {
        self.cancellations.load(Ordering::SeqCst)
    }
}

impl Default for SimulatedRadio {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RadioControl for SimulatedRadio {
    async fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    async fn cancel_discovery(&self) {
        self.cancellations.fetch_add(1, Ordering::SeqCst);
    }
}
