//! Selection of discovered peers to initiate towards

use btchat_shared::{DiscoveredPeer, PeerAddress};
use std::collections::HashSet;

/// Picks discovery candidates: each address once per scan, optionally only
/// devices whose name contains a fragment.
#[derive(Debug, Default)]
pub struct CandidateFilter {
    name_fragment: Option<String>,
    seen: HashSet<PeerAddress>,
}

impl CandidateFilter {
    pub fn new(name_fragment: Option<String>) -> Self {
        Self {
            name_fragment,
            seen: HashSet::new(),
        }
    }

    /// Record `peer` and decide whether to connect to it
    pub fn accept(&mut self, peer: &DiscoveredPeer) -> bool {
        if !self.seen.insert(peer.address.clone()) {
            return false;
        }

        match (&self.name_fragment, &peer.name) {
            (None, _) => true,
            (Some(fragment), Some(name)) => name.contains(fragment.as_str()),
            (Some(_), None) => false,
        }
    }

    /// Forget seen devices, e.g. when a scan finishes
    pub fn reset(&mut self) {
        self.seen.clear();
    }
}
