//! The chunk engine: split, encrypt, sign; decrypt, reassemble.
//!
//! The serialized payload is split into plaintext pieces of at most
//! [`MAX_CHUNK_SIZE`] bytes and each piece is encrypted separately with the
//! epoch content key, so every chunk is independently verifiable and
//! decryptable. The signature covers the ciphertext; a relay can validate
//! nothing about the content and a subscriber can verify authorship before
//! spending a decrypt.

use zajel_crypto::ed25519::SigningKey;
use zajel_crypto::kdf::SessionKey;
use zajel_types::chunk::{Chunk, ChunkPayload, MAX_CHUNK_SIZE};

use crate::{ChannelError, Result};

/// Split a payload into signed, encrypted chunks.
///
/// All chunks share `sequence`; `chunk_index` runs `0..total_chunks`.
pub fn split_into_chunks(
    payload: &ChunkPayload,
    channel_id: &str,
    sequence: u64,
    routing_hash: &str,
    content_key: &SessionKey,
    author: &SigningKey,
) -> Result<Vec<Chunk>> {
    let plaintext = payload.to_bytes()?;
    let author_hex = author.verifying_key().to_hex();

    let pieces: Vec<&[u8]> = if plaintext.is_empty() {
        vec![&[]]
    } else {
        plaintext.chunks(MAX_CHUNK_SIZE).collect()
    };
    let total = pieces.len() as u32;

    let mut chunks = Vec::with_capacity(pieces.len());
    for (index, piece) in pieces.into_iter().enumerate() {
        let encrypted = content_key.encrypt(piece)?;
        let signature = author.sign(&encrypted).to_hex();

        chunks.push(Chunk {
            chunk_id: Chunk::format_id(channel_id, sequence, index as u32),
            channel_id: channel_id.to_string(),
            routing_hash: routing_hash.to_string(),
            sequence,
            chunk_index: index as u32,
            total_chunks: total,
            size: encrypted.len() as u64,
            signature,
            author_pubkey: author_hex.clone(),
            encrypted_payload: encrypted,
        });
    }

    Ok(chunks)
}

/// Reassemble a message from its chunks.
///
/// Chunks are sorted by `chunk_index`; each is decrypted independently and
/// the plaintext segments concatenated. Out-of-order arrival is fine;
/// a missing index is an error.
pub fn assemble(chunks: &[Chunk], content_key: &SessionKey) -> Result<ChunkPayload> {
    let total = chunks
        .first()
        .map(|c| c.total_chunks)
        .ok_or(ChannelError::MissingChunk { index: 0, total: 0 })?;

    let mut sorted: Vec<&Chunk> = chunks.iter().collect();
    sorted.sort_by_key(|c| c.chunk_index);
    sorted.dedup_by_key(|c| c.chunk_index);

    for expected in 0..total {
        if !sorted.iter().any(|c| c.chunk_index == expected) {
            return Err(ChannelError::MissingChunk {
                index: expected,
                total,
            });
        }
    }

    let mut plaintext = Vec::new();
    for chunk in &sorted {
        let piece = content_key.decrypt(&chunk.encrypted_payload)?;
        plaintext.extend_from_slice(&piece);
    }

    Ok(ChunkPayload::from_bytes(&plaintext)?)
}
