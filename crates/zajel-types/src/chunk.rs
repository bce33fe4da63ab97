//! Encrypted content chunks.
//!
//! A logical channel message is split into chunks of at most
//! [`MAX_CHUNK_SIZE`] plaintext bytes. Each chunk is independently
//! encrypted and signed so it can be verified and decrypted in isolation;
//! a message is the contiguous run `chunk_index in [0, total_chunks)`
//! sharing one `sequence`.
//!
//! The 64 KiB limit is a protocol constant shared by client and server.
//! Both sides must enforce the same number; a relay that enforces a smaller
//! limit silently rejects every push.

use serde::{Deserialize, Serialize};

use crate::{Result, TypesError};

/// Maximum plaintext payload per chunk: 64 KiB.
pub const MAX_CHUNK_SIZE: usize = 64 * 1024;

/// AEAD overhead per sealed chunk: 12-byte nonce plus 16-byte tag.
pub const CHUNK_CIPHER_OVERHEAD: usize = 12 + 16;

/// Maximum size of a sealed chunk on the wire and in the relay cache.
///
/// Client and server both validate against this one constant; the two
/// sides disagreeing on the limit makes every push fail silently.
pub const MAX_SEALED_CHUNK_SIZE: usize = MAX_CHUNK_SIZE + CHUNK_CIPHER_OVERHEAD;

/// Validate a sealed chunk payload length against the shared limit.
pub fn validate_sealed_size(payload_len: usize) -> Result<()> {
    if payload_len > MAX_SEALED_CHUNK_SIZE {
        return Err(TypesError::Validation(format!(
            "sealed chunk is {payload_len} bytes, limit is {MAX_SEALED_CHUNK_SIZE}"
        )));
    }
    Ok(())
}

/// An encrypted, signed unit of channel content.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// `ch_{channel_id}_seq{sequence}_idx{chunk_index}`.
    pub chunk_id: String,
    /// Owning channel id.
    pub channel_id: String,
    /// Per-epoch routing hash (hex) used by the relay instead of a stable
    /// channel identifier.
    pub routing_hash: String,
    /// Message sequence number within the channel.
    pub sequence: u64,
    /// Zero-based index of this chunk within the message.
    pub chunk_index: u32,
    /// Total number of chunks in the message.
    pub total_chunks: u32,
    /// Ciphertext size in bytes.
    pub size: u64,
    /// Ed25519 signature over the ciphertext, hex-encoded.
    pub signature: String,
    /// Author's Ed25519 public key, hex-encoded.
    pub author_pubkey: String,
    /// `nonce || ciphertext || mac`, base64-encoded on the wire.
    #[serde(with = "base64_bytes")]
    pub encrypted_payload: Vec<u8>,
}

impl Chunk {
    /// Format a chunk id from its coordinates.
    pub fn format_id(channel_id: &str, sequence: u64, chunk_index: u32) -> String {
        format!("ch_{channel_id}_seq{sequence}_idx{chunk_index}")
    }
}

/// Plaintext chunk payload, serialized as JSON before encryption.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkPayload {
    /// Content type.
    #[serde(rename = "type")]
    pub kind: ContentType,
    /// Raw content bytes, base64-encoded in the serialized form.
    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,
    /// Free-form metadata (filename, dimensions, poll options, ...).
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    /// Author timestamp, Unix seconds.
    pub timestamp: u64,
    /// Chunk id of the message this replies to, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
}

impl ChunkPayload {
    /// Serialize to the canonical JSON form used as AEAD plaintext.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| TypesError::InvalidEncoding(format!("chunk payload: {e}")))
    }

    /// Parse from decrypted bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| TypesError::InvalidEncoding(format!("chunk payload: {e}")))
    }
}

/// Channel content types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Text,
    File,
    Image,
    Audio,
    Video,
    Document,
    Poll,
}

/// Base64 (standard alphabet) serde adapter for binary fields carried in
/// JSON messages.
pub mod base64_bytes {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
