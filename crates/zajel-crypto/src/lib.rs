//! # zajel-crypto
//!
//! Cryptographic primitives for the Zajel protocol. The suite is fixed —
//! no algorithm negotiation:
//!
//! - X25519 key agreement for identities and sessions
//! - Ed25519 for channel manifests and chunk signatures
//! - ChaCha20-Poly1305 AEAD for all payload encryption
//! - HKDF-SHA256 for session and content key derivation
//! - Argon2id for optional at-rest identity wrapping
//!
//! ## Modules
//!
//! - [`x25519`] — static/ephemeral key agreement
//! - [`ed25519`] — signing and verification
//! - [`chacha20`] — AEAD with nonce-prepended convenience forms
//! - [`kdf`] — session keys and per-epoch channel content keys
//! - [`sealed`] — sealed boxes for dead drops (ephemeral ECDH + AEAD)
//! - [`argon2id`] — passphrase wrapping of identity key material
//! - [`safety`] — 60-digit safety numbers

pub mod argon2id;
pub mod chacha20;
pub mod ed25519;
pub mod kdf;
pub mod safety;
pub mod sealed;
pub mod x25519;

use zajel_types::identity::StableId;

/// Error types for cryptographic operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// A key, nonce, or blob had the wrong length or encoding.
    #[error("invalid encoding: {0}")]
    InvalidEncoding(String),

    /// AEAD authentication failed.
    #[error("message authentication failed")]
    BadMac,

    /// Ed25519 signature verification failed.
    #[error("signature verification failed")]
    BadSignature,

    /// A key did not match the expected identity.
    #[error("key mismatch: {0}")]
    KeyMismatch(String),

    /// Internal failure in an underlying primitive.
    #[error("crypto internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, CryptoError>;

/// Generate a fresh device identity: an X25519 static keypair plus a new
/// random stable id.
///
/// The stable id is persisted in plain preferences; the secret key goes to
/// secure storage (optionally wrapped, see [`argon2id`]).
pub fn generate_identity() -> (x25519::X25519StaticSecret, StableId) {
    (x25519::X25519StaticSecret::random(), StableId::random())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_identity_unique() {
        let (sk_a, id_a) = generate_identity();
        let (sk_b, id_b) = generate_identity();
        assert_ne!(id_a, id_b);
        assert_ne!(
            sk_a.public_key().to_bytes(),
            sk_b.public_key().to_bytes()
        );
    }
}
