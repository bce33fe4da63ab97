//! Subscriber-side chunk verification.
//!
//! Five steps, in order:
//!
//! 1. chunk signature verifies against `author_pubkey`
//! 2. `author_pubkey` is the owner key or a delegated admin key
//! 3. the manifest signature verifies against `manifest.owner_key`
//! 4. `manifest.owner_key` equals the key pinned at subscribe time
//! 5. the payload decrypts under the epoch content key
//!
//! Steps 1–4 are all evaluated before any decision is taken, even when an
//! early step has already failed on empty or malformed input; only step 5
//! (the decrypt) is gated on the first four. The reported failure is the
//! earliest failing step.

use zajel_crypto::ed25519::{Signature, VerifyingKey};
use zajel_crypto::kdf;
use zajel_crypto::x25519::X25519StaticSecret;
use zajel_types::channel::ChannelManifest;
use zajel_types::chunk::{Chunk, ChunkPayload};

use crate::manifest::verify_manifest;
use crate::{ChannelError, Result};

/// The verification step that rejected a chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VerifyStep {
    /// Step 1: chunk signature invalid.
    ChunkSignature,
    /// Step 2: author key not authorized by the manifest.
    AuthorNotInManifest,
    /// Step 3: manifest signature invalid.
    ManifestSignature,
    /// Step 4: manifest owner differs from the pinned owner key.
    OwnerKeyPin,
    /// Step 5: payload failed to decrypt.
    Decrypt,
}

/// Run the full verification pipeline and return the decrypted payload.
pub fn verify_chunk(
    chunk: &Chunk,
    manifest: &ChannelManifest,
    pinned_owner_hex: &str,
    encryption_secret: &X25519StaticSecret,
) -> Result<ChunkPayload> {
    // Steps 1-4 are evaluated unconditionally.
    let step1 = chunk_signature_ok(chunk);
    let step2 = manifest.is_authorized_author(&chunk.author_pubkey);
    let step3 = verify_manifest(manifest).is_ok();
    let step4 = manifest.owner_key == pinned_owner_hex;

    if !step1 {
        return Err(ChannelError::Verification(VerifyStep::ChunkSignature));
    }
    if !step2 {
        return Err(ChannelError::Verification(VerifyStep::AuthorNotInManifest));
    }
    if !step3 {
        return Err(ChannelError::Verification(VerifyStep::ManifestSignature));
    }
    if !step4 {
        return Err(ChannelError::Verification(VerifyStep::OwnerKeyPin));
    }

    // Step 5: decrypt with the epoch content key.
    let content_key = kdf::derive_content_key(encryption_secret, manifest.key_epoch)?;
    let plaintext = content_key
        .decrypt(&chunk.encrypted_payload)
        .map_err(|_| ChannelError::Verification(VerifyStep::Decrypt))?;

    ChunkPayload::from_bytes(&plaintext)
        .map_err(|_| ChannelError::Verification(VerifyStep::Decrypt))
}

/// Verify and assemble a whole message, checking every chunk.
pub fn verify_and_assemble(
    chunks: &[Chunk],
    manifest: &ChannelManifest,
    pinned_owner_hex: &str,
    encryption_secret: &X25519StaticSecret,
) -> Result<ChunkPayload> {
    let total = chunks
        .first()
        .map(|c| c.total_chunks)
        .ok_or(ChannelError::MissingChunk { index: 0, total: 0 })?;

    let mut sorted: Vec<&Chunk> = chunks.iter().collect();
    sorted.sort_by_key(|c| c.chunk_index);

    // Verify every chunk before concatenating.
    for chunk in &sorted {
        let step1 = chunk_signature_ok(chunk);
        let step2 = manifest.is_authorized_author(&chunk.author_pubkey);
        let step3 = verify_manifest(manifest).is_ok();
        let step4 = manifest.owner_key == pinned_owner_hex;
        if !step1 {
            return Err(ChannelError::Verification(VerifyStep::ChunkSignature));
        }
        if !step2 {
            return Err(ChannelError::Verification(VerifyStep::AuthorNotInManifest));
        }
        if !step3 {
            return Err(ChannelError::Verification(VerifyStep::ManifestSignature));
        }
        if !step4 {
            return Err(ChannelError::Verification(VerifyStep::OwnerKeyPin));
        }
    }

    for expected in 0..total {
        if !sorted.iter().any(|c| c.chunk_index == expected) {
            return Err(ChannelError::MissingChunk {
                index: expected,
                total,
            });
        }
    }

    let content_key = kdf::derive_content_key(encryption_secret, manifest.key_epoch)?;
    let mut plaintext = Vec::new();
    for chunk in &sorted {
        let piece = content_key
            .decrypt(&chunk.encrypted_payload)
            .map_err(|_| ChannelError::Verification(VerifyStep::Decrypt))?;
        plaintext.extend_from_slice(&piece);
    }

    ChunkPayload::from_bytes(&plaintext)
        .map_err(|_| ChannelError::Verification(VerifyStep::Decrypt))
}

/// Step 1 as a total predicate: malformed keys or signatures count as a
/// failed verification, not an early exit.
fn chunk_signature_ok(chunk: &Chunk) -> bool {
    let author = match VerifyingKey::from_hex(&chunk.author_pubkey) {
        Ok(key) => key,
        Err(_) => return false,
    };
    let signature = match Signature::from_hex(&chunk.signature) {
        Ok(sig) => sig,
        Err(_) => return false,
    };
    author.verify(&chunk.encrypted_payload, &signature).is_ok()
}
