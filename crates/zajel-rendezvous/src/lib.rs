//! # zajel-rendezvous
//!
//! Meeting-point derivation and the rendezvous (matchmaking) client.
//!
//! Two peers that know each other's stable ids can independently derive the
//! same opaque tokens and register at them on a signaling server. The server
//! matches registrations at the same token without learning who the peers
//! are. Asynchronous reconnection uses dead drops: sealed connection-info
//! envelopes left at a token for the other side to collect later.
//!
//! ## Modules
//!
//! - [`meeting_point`] — daily points and hourly tokens
//! - [`dead_drop`] — sealing and opening dead-drop envelopes
//! - [`service`] — the matchmaker client and reconnect policy

pub mod dead_drop;
pub mod meeting_point;
pub mod service;

/// Error types for rendezvous operations.
#[derive(Debug, thiserror::Error)]
pub enum RendezvousError {
    /// The peer's stable id is unknown or its record is unusable.
    #[error("peer not found: {0}")]
    PeerNotFound(String),

    /// A dead drop could not be decrypted (stale key or corrupt payload).
    #[error("dead drop decrypt failed")]
    DeadDropDecryptFailed,

    /// The signaling exchange failed.
    #[error("signaling error: {0}")]
    Signaling(String),

    /// Underlying cryptographic failure.
    #[error(transparent)]
    Crypto(#[from] zajel_crypto::CryptoError),

    /// Malformed payload encoding.
    #[error("invalid encoding: {0}")]
    InvalidEncoding(String),
}

pub type Result<T> = std::result::Result<T, RendezvousError>;
