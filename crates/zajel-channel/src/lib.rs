//! # zajel-channel
//!
//! The broadcast-channel engine: signed manifests with delegated admin
//! keys, the chunk engine that splits, encrypts, and signs channel content,
//! subscriber-side five-step verification, per-epoch routing hashes, and
//! the live-stream state machine.
//!
//! ## Modules
//!
//! - [`manifest`] — create/sign/verify manifests, admin appointment and
//!   removal with encryption-key rotation
//! - [`chunker`] — split and assemble encrypted chunks
//! - [`verify`] — the subscriber verification pipeline
//! - [`routing`] — per-epoch routing hashes
//! - [`invite`] — channel invite links and subscription
//! - [`live`] — live streaming and VOD conversion

pub mod chunker;
pub mod invite;
pub mod live;
pub mod manifest;
pub mod routing;
pub mod verify;

/// Error types for channel operations.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// Operation requires a role the caller does not hold.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The admin key is already present in the manifest.
    #[error("admin key already appointed")]
    AdminExists,

    /// The owner key cannot also be an admin key.
    #[error("owner cannot be appointed admin")]
    AdminIsOwner,

    /// The admin key is not present in the manifest.
    #[error("admin key not found")]
    AdminNotFound,

    /// Subscriber verification rejected a chunk.
    #[error("chunk verification failed at {0:?}")]
    Verification(verify::VerifyStep),

    /// A chunk exceeds the shared size limit.
    #[error("chunk too large: {size} > {limit}")]
    ChunkTooLarge { size: usize, limit: usize },

    /// A chunk needed for assembly is missing.
    #[error("missing chunk {index} of {total}")]
    MissingChunk { index: u32, total: u32 },

    /// The live stream is not in the required state.
    #[error("invalid stream state: {0}")]
    StreamState(String),

    /// Underlying cryptographic failure.
    #[error(transparent)]
    Crypto(#[from] zajel_crypto::CryptoError),

    /// Malformed data encoding.
    #[error("invalid encoding: {0}")]
    Encoding(String),
}

impl From<zajel_types::TypesError> for ChannelError {
    fn from(e: zajel_types::TypesError) -> Self {
        Self::Encoding(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ChannelError>;
