//! Per-epoch routing hashes.
//!
//! Chunks are routed through the relay by an HMAC of the channel secret
//! over the current time window rather than by a stable channel id. The
//! hash rotates every window, so the relay cannot maintain a durable
//! per-channel blocklist.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// The UTC window a routing epoch covers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum EpochWindow {
    /// One epoch per UTC hour (default during active distribution).
    #[default]
    Hourly,
    /// One epoch per UTC day (idle channels).
    Daily,
}

impl EpochWindow {
    /// The epoch identifier for a point in time.
    pub fn epoch_id(&self, at: DateTime<Utc>) -> String {
        match self {
            Self::Hourly => at.format("%Y-%m-%dT%H").to_string(),
            Self::Daily => at.format("%Y-%m-%d").to_string(),
        }
    }
}

/// Derive the routing hash for a channel secret and epoch id:
/// `HMAC-SHA256(channel_secret, "epoch:{epoch_id}")`, hex-encoded.
pub fn derive_routing_hash(channel_secret: &[u8; 32], epoch_id: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(channel_secret)
        .unwrap_or_else(|_| unreachable!("HMAC accepts any key length"));
    mac.update(b"epoch:");
    mac.update(epoch_id.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Convenience: routing hash for the window containing `at`.
pub fn routing_hash_at(
    channel_secret: &[u8; 32],
    window: EpochWindow,
    at: DateTime<Utc>,
) -> String {
    derive_routing_hash(channel_secret, &window.epoch_id(at))
}
