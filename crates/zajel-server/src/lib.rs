//! # zajel-server
//!
//! The signaling server: bootstrap registry with signed discovery, relay
//! and rendezvous registries, the chunk relay, and the WebSocket
//! dispatcher that ties them to connected peers.
//!
//! The server never sees plaintext: dead drops and chunk payloads arrive
//! sealed, meeting points are opaque tokens, and routing hashes rotate
//! per epoch.
//!
//! ## Modules
//!
//! - [`config`] — TOML server configuration
//! - [`bootstrap`] — signed server discovery registry (REST)
//! - [`relay_registry`] — capacity-aware relay candidate picks
//! - [`rendezvous_registry`] — meeting-point buckets and dead-drop queues
//! - [`chunk_relay`] — cache, source index, pull-on-demand, fan-out
//! - [`ws`] — the WebSocket dispatcher

pub mod bootstrap;
pub mod chunk_relay;
pub mod config;
pub mod relay_registry;
pub mod rendezvous_registry;
pub mod ws;

/// Error types for server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Input failed validation.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Referenced entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Operation illegal in the current state.
    #[error("invalid state: {0}")]
    State(String),

    /// Storage failure.
    #[error(transparent)]
    Db(#[from] zajel_db::DbError),

    /// Serialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, ServerError>;
