//! Sealed boxes for dead drops.
//!
//! A dead drop must be readable only by the intended peer, using nothing
//! but that peer's current public key. The sender generates an ephemeral
//! X25519 keypair, derives an AEAD key from the ephemeral-static exchange,
//! and prepends the ephemeral public key to the blob:
//!
//! ```text
//! seal(recipient_pk, plaintext):
//!   (eph_pk, shared) = ephemeral_key_exchange(recipient_pk)
//!   key = HKDF-SHA256(shared, info = "zajel:sealed:v1")
//!   return eph_pk || nonce || ciphertext || tag
//! ```

use hkdf::Hkdf;
use sha2::Sha256;

use crate::chacha20;
use crate::x25519::{self, X25519PublicKey, X25519StaticSecret};
use crate::{CryptoError, Result};

/// Info string for sealed-box key derivation.
pub const SEALED_INFO: &str = "zajel:sealed:v1";

/// Minimum size of a sealed blob: ephemeral key + nonce + tag.
pub const MIN_SEALED_LEN: usize = 32 + chacha20::NONCE_SIZE + chacha20::TAG_SIZE;

/// Seal a payload for a recipient's public key.
pub fn seal(recipient: &X25519PublicKey, plaintext: &[u8]) -> Result<Vec<u8>> {
    let (eph_pk, shared) = x25519::ephemeral_key_exchange(recipient);

    let hk = Hkdf::<Sha256>::new(None, shared.as_bytes());
    let mut key = [0u8; 32];
    hk.expand(SEALED_INFO.as_bytes(), &mut key)
        .map_err(|e| CryptoError::Internal(format!("hkdf expand: {e}")))?;

    let sealed = chacha20::encrypt_prepend_nonce(&key, plaintext)?;

    let mut out = Vec::with_capacity(32 + sealed.len());
    out.extend_from_slice(&eph_pk.to_bytes());
    out.extend_from_slice(&sealed);
    Ok(out)
}

/// Open a sealed blob with the recipient's secret key.
pub fn open(recipient: &X25519StaticSecret, blob: &[u8]) -> Result<Vec<u8>> {
    if blob.len() < MIN_SEALED_LEN {
        return Err(CryptoError::InvalidEncoding("sealed blob too short".into()));
    }

    let mut eph_bytes = [0u8; 32];
    eph_bytes.copy_from_slice(&blob[..32]);
    let eph_pk = X25519PublicKey::from_bytes(eph_bytes);

    let shared = recipient.diffie_hellman(&eph_pk);
    let hk = Hkdf::<Sha256>::new(None, shared.as_bytes());
    let mut key = [0u8; 32];
    hk.expand(SEALED_INFO.as_bytes(), &mut key)
        .map_err(|e| CryptoError::Internal(format!("hkdf expand: {e}")))?;

    chacha20::decrypt_prepend_nonce(&key, &blob[32..])
}
