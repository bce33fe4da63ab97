//! The relay registry: peers offering themselves as introduction relays.
//!
//! Candidate selection filters on load factor (< 0.5) and shuffles the
//! survivors per request so load spreads instead of piling onto whichever
//! peer happens to sort first. Removal on disconnect is synchronous —
//! a dead relay must never be handed out.

use std::collections::HashMap;
use std::sync::Mutex;

use rand::seq::SliceRandom;
use tracing::debug;

use zajel_types::signaling::RelayInfo;

/// Load factor above which a relay is not handed out.
const LOAD_CUTOFF: f64 = 0.5;

#[derive(Clone, Debug)]
struct RelayPeer {
    public_key: String,
    max_connections: u32,
    connected_count: u32,
    registered_at: u64,
    last_update: u64,
}

/// The registry. Interior mutability so the WS dispatcher can share it.
#[derive(Default)]
pub struct RelayRegistry {
    peers: Mutex<HashMap<String, RelayPeer>>,
}

impl RelayRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or re-register) a peer as a relay.
    pub fn register(&self, peer_id: &str, public_key: &str, max_connections: u32, now: u64) {
        let mut peers = self.peers.lock().unwrap_or_else(|p| p.into_inner());
        peers.insert(
            peer_id.to_string(),
            RelayPeer {
                public_key: public_key.to_string(),
                max_connections: max_connections.max(1),
                connected_count: 0,
                registered_at: now,
                last_update: now,
            },
        );
    }

    /// Update a relay's reported load.
    pub fn update_load(&self, peer_id: &str, connected_count: u32, now: u64) {
        let mut peers = self.peers.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(peer) = peers.get_mut(peer_id) {
            peer.connected_count = connected_count;
            peer.last_update = now;
        }
    }

    /// Remove a peer on disconnect. Synchronous by design.
    pub fn remove(&self, peer_id: &str) {
        let mut peers = self.peers.lock().unwrap_or_else(|p| p.into_inner());
        if peers.remove(peer_id).is_some() {
            debug!(peer = %peer_id, "relay removed");
        }
    }

    /// Number of registered relays.
    pub fn len(&self) -> usize {
        self.peers.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Up to `n` relays under the load cutoff, shuffled, excluding the
    /// requester.
    pub fn get_available_relays(&self, exclude_peer_id: &str, n: usize) -> Vec<RelayInfo> {
        let peers = self.peers.lock().unwrap_or_else(|p| p.into_inner());
        let mut candidates: Vec<RelayInfo> = peers
            .iter()
            .filter(|(id, _)| id.as_str() != exclude_peer_id)
            .filter(|(_, p)| {
                (p.connected_count as f64) / (p.max_connections as f64) < LOAD_CUTOFF
            })
            .map(|(id, p)| RelayInfo {
                peer_id: id.clone(),
                public_key: p.public_key.clone(),
                capacity: p.max_connections,
            })
            .collect();
        drop(peers);

        candidates.shuffle(&mut rand::rngs::OsRng);
        candidates.truncate(n);
        candidates
    }

    /// Registration timestamp, for diagnostics.
    pub fn registered_at(&self, peer_id: &str) -> Option<u64> {
        self.peers
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(peer_id)
            .map(|p| p.registered_at)
    }
}
