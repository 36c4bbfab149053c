//! Bluetooth device discovery feeding candidate peers to the node

use anyhow::Result;
use bluer::{Adapter, AdapterEvent};
use btchat_shared::{DiscoveredPeer, PeerAddress};
use futures::StreamExt;
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Configuration for Bluetooth discovery
#[derive(Debug, Clone)]
pub struct BtDiscoveryConfig {
    /// How long to scan for devices
    pub scan_duration: Duration,
}

impl Default for BtDiscoveryConfig {
    fn default() -> Self {
        Self {
            scan_duration: Duration::from_secs(12),
        }
    }
}

/// Bluetooth device discovery service
pub struct BtDiscovery {
    config: BtDiscoveryConfig,
}

impl BtDiscovery {
    /// Create a new discovery service
    pub fn new(config: BtDiscoveryConfig) -> Self {
        Self { config }
    }

    /// Start scanning in the background.
    ///
    /// Every device seen during the scan is reported once on the returned
    /// channel. Aborting the task stops the scan.
    pub fn start(
        &self,
        adapter: Adapter,
    ) -> (mpsc::Receiver<DiscoveredPeer>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(32);
        let scan_duration = self.config.scan_duration;

        let handle = tokio::spawn(async move {
            if let Err(e) = scan(adapter, scan_duration, tx).await {
                warn!("[BT] Discovery failed: {}", e);
            }
        });

        (rx, handle)
    }
}

async fn scan(
    adapter: Adapter,
    scan_duration: Duration,
    tx: mpsc::Sender<DiscoveredPeer>,
) -> Result<()> {
    let discover = adapter.discover_devices().await?;
    tokio::pin!(discover);
    info!("[BT] Discovery started");

    let mut seen = HashSet::new();
    let scan_result = timeout(scan_duration, async {
        while let Some(evt) = discover.next().await {
            let AdapterEvent::DeviceAdded(addr) = evt else {
                continue;
            };
            if !seen.insert(addr) {
                continue;
            }

            let name = match adapter.device(addr) {
                Ok(device) => device.name().await.ok().flatten(),
                Err(_) => None,
            };
            debug!("[BT] Found {} ({:?})", addr, name);

            let peer = DiscoveredPeer {
                address: PeerAddress::new(addr.to_string()),
                name,
            };
            if tx.send(peer).await.is_err() {
                break;
            }
        }
    })
    .await;

    // Timeout is expected, not an error
    if scan_result.is_err() {
        info!("[BT] Discovery finished");
    }
    Ok(())
}
