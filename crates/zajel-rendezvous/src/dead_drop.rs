//! Dead-drop sealing and opening.
//!
//! The plaintext is the JSON form of [`DeadDropPayload`]; the sealed form
//! is a sealed box for the recipient's current public key, base64-encoded
//! for transport inside signaling messages.

use base64::Engine;
use tracing::warn;

use zajel_crypto::sealed;
use zajel_crypto::x25519::{X25519PublicKey, X25519StaticSecret};
use zajel_types::deaddrop::DeadDropPayload;

use crate::{RendezvousError, Result};

/// Seal a dead drop for a peer's public key. Returns the base64 transport
/// form.
pub fn package_dead_drop(payload: &DeadDropPayload, recipient: &X25519PublicKey) -> Result<String> {
    let json = serde_json::to_vec(payload)
        .map_err(|e| RendezvousError::InvalidEncoding(format!("dead drop: {e}")))?;
    let blob = sealed::seal(recipient, &json)?;
    Ok(base64::engine::general_purpose::STANDARD.encode(blob))
}

/// Open a base64 sealed dead drop with our identity secret.
///
/// Any failure — base64, AEAD, or JSON — maps to
/// [`RendezvousError::DeadDropDecryptFailed`]; the caller treats the peer
/// as stale and retries next cycle.
pub fn open_dead_drop(identity: &X25519StaticSecret, encoded: &str) -> Result<DeadDropPayload> {
    let blob = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim().as_bytes())
        .map_err(|e| {
            warn!(error = %e, "dead drop is not valid base64");
            RendezvousError::DeadDropDecryptFailed
        })?;

    let json = sealed::open(identity, &blob).map_err(|e| {
        warn!(error = %e, "dead drop failed to decrypt");
        RendezvousError::DeadDropDecryptFailed
    })?;

    serde_json::from_slice(&json).map_err(|e| {
        warn!(error = %e, "dead drop decrypted but payload is malformed");
        RendezvousError::DeadDropDecryptFailed
    })
}
