//! # zajel-connection
//!
//! The per-peer connection manager: handshake and stable-identity
//! resolution, trust-on-first-use key-rotation detection, session
//! establishment, and per-type routing of inbound plaintext to dedicated
//! single-consumer streams.
//!
//! ## Modules
//!
//! - [`state`] — the peer connection state machine
//! - [`streams`] — typed inbound streams and the prefix router
//! - [`handshake`] — the handshake payload and identity resolution
//! - [`manager`] — the connection manager itself

pub mod handshake;
pub mod manager;
pub mod state;
pub mod streams;

/// Error types for connection management.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// No connection entry for the peer.
    #[error("not connected: {0}")]
    NotConnected(String),

    /// The peer disappeared while the handshake was in flight.
    #[error("peer vanished during handshake: {0}")]
    PeerVanished(String),

    /// Malformed handshake payload.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// An illegal state transition was attempted.
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// The manager was disposed.
    #[error("connection manager disposed")]
    Disposed,

    /// The data channel rejected an outbound frame.
    #[error("transport error: {0}")]
    Transport(String),

    /// Underlying cryptographic failure.
    #[error(transparent)]
    Crypto(#[from] zajel_crypto::CryptoError),

    /// Storage failure.
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<zajel_db::DbError> for ConnectionError {
    fn from(e: zajel_db::DbError) -> Self {
        Self::Storage(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ConnectionError>;
