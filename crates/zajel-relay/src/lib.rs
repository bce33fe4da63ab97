//! # zajel-relay
//!
//! The relay plane: peers volunteer as introduction forwarders for peers
//! that cannot reach each other directly.
//!
//! A client keeps a small pool of persistent control connections to relay
//! peers ([`client::RelayClient`]); a peer acting as a relay runs a
//! [`forwarder::RelayForwarder`] that maps ephemeral source ids to its
//! connected peers. The underlying data-channel transport (WebRTC in
//! production) sits behind the [`transport::DataChannel`] seam; tests use
//! the in-memory pair.
//!
//! ## Modules
//!
//! - [`transport`] — the data-channel seam and in-memory test transport
//! - [`wire`] — relay control frames
//! - [`client`] — relay pool, introductions, load reporting
//! - [`forwarder`] — the relay-peer side

pub mod client;
pub mod forwarder;
pub mod transport;
pub mod wire;

/// Error types for relay operations.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The named relay has no connected control channel.
    #[error("relay not connected: {0}")]
    RelayNotConnected(String),

    /// The introduction target is unknown to the relay.
    #[error("introduction target not found")]
    TargetNotFound,

    /// The relay pool is full.
    #[error("relay connection limit reached")]
    LimitReached,

    /// Transport-level failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The data channel did not open in time.
    #[error("data channel open timed out")]
    OpenTimeout,

    /// Malformed control frame.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
}

pub type Result<T> = std::result::Result<T, RelayError>;

/// Generate a random 16-character source id.
///
/// Generated once per device and persisted; it identifies this peer to a
/// relay without exposing the stable id.
pub fn generate_source_id() -> String {
    use rand::Rng;
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut rng = rand::rngs::OsRng;
    (0..16)
        .map(|_| {
            let idx = rng.gen_range(0..ALPHABET.len());
            ALPHABET[idx] as char
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_id_shape() {
        let id = generate_source_id();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_source_ids_unique() {
        assert_ne!(generate_source_id(), generate_source_id());
    }
}
