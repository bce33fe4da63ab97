//! Trusted peer records.
//!
//! The local device is the exclusive owner of its peer records; the mapping
//! `stable_id -> record` is unique and all mutations go through the single
//! store actor in `zajel-db`. The first key observed for a peer is pinned
//! (trust-on-first-use); later key changes are recorded here and surfaced to
//! the user until acknowledged.

use serde::{Deserialize, Serialize};

use crate::identity::StableId;

/// A trusted peer, keyed by stable id rather than public key so that trust
/// survives key rotation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRecord {
    /// The peer's stable identity.
    pub stable_id: StableId,
    /// Current X25519 public key, base64-encoded.
    pub public_key: String,
    /// Previous public key if a rotation was observed.
    pub previous_public_key: Option<String>,
    /// Unix timestamp of the last observed key rotation.
    pub key_rotated_at: Option<u64>,
    /// False until the user has verified the new safety number.
    pub key_change_acknowledged: bool,
    /// Unix timestamp the peer was first trusted.
    pub trusted_at: u64,
    /// Optional user-assigned alias.
    pub alias: Option<String>,
    /// Unix timestamp the peer was blocked, if blocked.
    pub blocked_since: Option<u64>,
}

impl PeerRecord {
    /// Create a freshly trusted record for a newly met peer.
    pub fn new(stable_id: StableId, public_key: String, trusted_at: u64) -> Self {
        Self {
            stable_id,
            public_key,
            previous_public_key: None,
            key_rotated_at: None,
            key_change_acknowledged: true,
            trusted_at,
            alias: None,
            blocked_since: None,
        }
    }

    /// Record an observed key rotation.
    ///
    /// The old key is retained for display on the safety-number screen and
    /// `key_change_acknowledged` drops to false until the user verifies.
    pub fn record_rotation(&mut self, new_public_key: String, rotated_at: u64) {
        self.previous_public_key = Some(std::mem::replace(&mut self.public_key, new_public_key));
        self.key_rotated_at = Some(rotated_at);
        self.key_change_acknowledged = false;
    }

    /// Whether this peer is currently blocked.
    pub fn is_blocked(&self) -> bool {
        self.blocked_since.is_some()
    }

    /// Decode the current public key from base64.
    ///
    /// Returns `None` on malformed base64 or wrong length; never panics.
    pub fn public_key_bytes(&self) -> Option<[u8; 32]> {
        decode_key(&self.public_key)
    }

    /// Decode the previous public key, if any.
    pub fn previous_public_key_bytes(&self) -> Option<[u8; 32]> {
        self.previous_public_key.as_deref().and_then(decode_key)
    }
}

fn decode_key(encoded: &str) -> Option<[u8; 32]> {
    use base64::Engine;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .ok()?;
    bytes.try_into().ok()
}
