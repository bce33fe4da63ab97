//! The signaling-server JSON message catalog.
//!
//! Every message the client and server exchange over the signaling
//! WebSocket is defined here, one struct per message plus the
//! [`SignalMessage`] envelope enum. Both sides of the protocol use these
//! same types; the wire form is internally tagged JSON
//! (`{"type": "register", ...}`).
//!
//! Chunk-sync messages deliberately tolerate two encodings of chunk data:
//! a fresh push carries a JSON object, while a relay cache hit may deliver
//! the stored JSON as a string. Consumers normalize via
//! [`ChunkData::chunk`].

use serde::{Deserialize, Serialize};

use crate::chunk::Chunk;
use crate::{Result, TypesError};

// ---------------------------------------------------------------------------
// Client -> server
// ---------------------------------------------------------------------------

/// Register as a peer (and potential relay) with the signaling server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Register {
    /// Stable peer id, hex-encoded.
    pub peer_id: String,
    /// X25519 public key, base64-encoded.
    pub public_key: String,
    /// Relay capacity this peer is willing to serve.
    pub max_connections: u32,
}

/// Register a set of meeting-point tokens plus a sealed dead drop.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegisterRendezvous {
    /// Registering peer id.
    pub peer_id: String,
    /// Three `day_`-prefixed tokens (yesterday, today, tomorrow).
    pub daily_points: Vec<String>,
    /// Three `hr_`-prefixed tokens (previous, current, next hour).
    pub hourly_tokens: Vec<String>,
    /// Sealed dead drop for the intended peer, base64-encoded.
    pub dead_drop: String,
    /// Relay this peer is reachable through.
    pub relay_id: String,
}

/// Report current relay load.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UpdateLoad {
    pub peer_id: String,
    pub connected_count: u32,
}

/// Announce locally held chunks (registers this peer as a source).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChunkAnnounce {
    pub peer_id: String,
    pub channel_id: String,
    pub chunks: Vec<ChunkRef>,
}

/// A chunk reference inside an announce.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRef {
    pub chunk_id: String,
    pub routing_hash: String,
}

/// Request a chunk by id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChunkRequest {
    pub peer_id: String,
    pub chunk_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
}

/// Request a chunk by metadata when its id is not yet known.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChunkRequestMeta {
    pub peer_id: String,
    pub routing_hash: String,
    pub sequence: u64,
    pub chunk_index: u32,
}

/// Deliver chunk data to the server (announce-push or answer to a pull).
///
/// `data` is the chunk as a JSON object, never a base64 string.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChunkPush {
    pub peer_id: String,
    pub chunk_id: String,
    pub channel_id: String,
    pub data: Chunk,
}

// ---------------------------------------------------------------------------
// Server -> client
// ---------------------------------------------------------------------------

/// Registration acknowledgement with the current relay candidates.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Registered {
    pub relays: Vec<RelayInfo>,
}

/// A relay candidate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RelayInfo {
    pub peer_id: String,
    pub public_key: String,
    pub capacity: u32,
}

/// Result of a rendezvous registration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RendezvousResult {
    /// Currently registered peers that matched a token.
    pub live_matches: Vec<LiveMatch>,
    /// Sealed dead drops left by peers that matched earlier, base64-encoded.
    pub dead_drops: Vec<String>,
}

/// A live rendezvous match.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LiveMatch {
    /// The matched peer's id.
    pub peer_id: String,
    /// Relay the matched peer is reachable through.
    pub relay_id: String,
    /// The matched peer's sealed dead drop, when one was registered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dead_drop: Option<String>,
}

/// Push notification: a new peer registered at one of our active tokens.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RendezvousMatch {
    #[serde(rename = "match")]
    pub matched: LiveMatch,
}

/// Server asks this client to upload a chunk it is a source for.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkPull {
    pub chunk_id: String,
}

/// Server delivers a chunk.
///
/// `data` may be a JSON object (fresh push) or a JSON-encoded string
/// (cache hit); use [`ChunkData::chunk`] to normalize.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChunkData {
    pub chunk_id: String,
    pub data: serde_json::Value,
    pub channel_id: String,
}

impl ChunkData {
    /// Decode `data` whether it arrived as an object or a JSON string.
    pub fn chunk(&self) -> Result<Chunk> {
        match &self.data {
            serde_json::Value::String(text) => serde_json::from_str(text)
                .map_err(|e| TypesError::InvalidEncoding(format!("chunk_data string: {e}"))),
            other => serde_json::from_value(other.clone())
                .map_err(|e| TypesError::InvalidEncoding(format!("chunk_data object: {e}"))),
        }
    }
}

/// A previously pending chunk became available (single or batched form).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkAvailable {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_ids: Option<Vec<String>>,
}

impl ChunkAvailable {
    /// All chunk ids named by this message, whichever form it took.
    pub fn ids(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        if let Some(id) = &self.chunk_id {
            out.push(id);
        }
        if let Some(ids) = &self.chunk_ids {
            out.extend(ids.iter().map(String::as_str));
        }
        out
    }
}

/// No online source for a requested chunk; the request stays pending.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkNotFound {
    pub chunk_id: String,
}

/// Server-side rejection of an invalid message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub error: String,
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// Every message that travels over the signaling WebSocket, tagged by
/// `type`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalMessage {
    Register(Register),
    Registered(Registered),
    RegisterRendezvous(RegisterRendezvous),
    RendezvousResult(RendezvousResult),
    RendezvousMatch(RendezvousMatch),
    UpdateLoad(UpdateLoad),
    ChunkAnnounce(ChunkAnnounce),
    ChunkRequest(ChunkRequest),
    ChunkRequestMeta(ChunkRequestMeta),
    ChunkPush(ChunkPush),
    ChunkPull(ChunkPull),
    ChunkData(ChunkData),
    ChunkAvailable(ChunkAvailable),
    ChunkNotFound(ChunkNotFound),
    Error(ErrorMessage),
}

impl SignalMessage {
    /// Serialize to the wire JSON form.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| TypesError::InvalidEncoding(format!("signal message: {e}")))
    }

    /// Parse a wire frame.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| TypesError::InvalidEncoding(format!("signal message: {e}")))
    }
}
