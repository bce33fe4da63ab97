//! # zajel-sync
//!
//! Client-side chunk synchronization: announcing local chunks, requesting
//! missing ones, answering relay pulls, swarm seeding, and the re-entrant
//! background sync pass.
//!
//! ## Modules
//!
//! - [`service`] — the chunk sync service (message handling)
//! - [`background`] — the periodic/background sync pass

pub mod background;
pub mod service;

/// Error types for chunk synchronization.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The signaling transport failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// Storage failure.
    #[error(transparent)]
    Db(#[from] zajel_db::DbError),

    /// Malformed message payload.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}

impl From<zajel_types::TypesError> for SyncError {
    fn from(e: zajel_types::TypesError) -> Self {
        Self::InvalidMessage(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
