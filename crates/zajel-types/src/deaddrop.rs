//! Dead-drop envelopes.
//!
//! A dead drop is the JSON payload a peer leaves at a meeting point so the
//! other side can reconnect asynchronously. It is sealed for the intended
//! peer's current public key; the signaling server stores only the opaque
//! ciphertext.

use serde::{Deserialize, Serialize};

use crate::identity::StableId;

/// Plaintext dead-drop contents (sealed before upload).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadDropPayload {
    /// Sender's current X25519 public key, base64-encoded.
    pub public_key: String,
    /// Sender's stable id.
    pub stable_id: StableId,
    /// Relay the sender is reachable through.
    pub relay_id: String,
    /// Sender's source id at that relay.
    pub source_id: String,
    /// Last known direct IP, if any.
    pub ip: Option<String>,
    /// Last known direct port, if any.
    pub port: Option<u16>,
    /// Additional relays to try if `relay_id` is gone.
    #[serde(default)]
    pub fallback_relays: Vec<String>,
    /// Unix timestamp the drop was packaged. Drops older than one hour are
    /// routed via relay instead of direct IP.
    pub timestamp: u64,
}

impl DeadDropPayload {
    /// Age of the drop in seconds relative to `now`, saturating at zero for
    /// clock skew.
    pub fn age_secs(&self, now: u64) -> u64 {
        now.saturating_sub(self.timestamp)
    }

    /// Whether the direct-IP path is still worth attempting.
    pub fn is_fresh(&self, now: u64) -> bool {
        self.age_secs(now) < 3600 && self.ip.is_some() && self.port.is_some()
    }
}
