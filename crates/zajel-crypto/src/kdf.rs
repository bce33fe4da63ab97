//! Session and content key derivation (HKDF-SHA256).
//!
//! All derivations use an empty salt and a domain-separating info string.
//!
//! Session keys are derived from a static-static X25519 exchange. There is
//! no ephemeral component, so the same identity pair always yields the same
//! session key — a known limitation accepted for v1; the derivation info
//! string is versioned so a ratcheted scheme can be introduced without
//! ambiguity.

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroize;

use crate::chacha20;
use crate::x25519::{SharedSecret, X25519PublicKey, X25519StaticSecret};
use crate::{CryptoError, Result};

/// Info string for session key derivation.
pub const SESSION_INFO: &str = "zajel:session:v1";

/// A 32-byte symmetric session key for one peer.
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct SessionKey {
    bytes: [u8; 32],
}

impl SessionKey {
    /// Create from raw bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self { bytes }
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }

    /// Encrypt a message for this session: `nonce || ciphertext || tag`.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        chacha20::encrypt_prepend_nonce(&self.bytes, plaintext)
    }

    /// Decrypt a `nonce || ciphertext || tag` blob from this session.
    pub fn decrypt(&self, blob: &[u8]) -> Result<Vec<u8>> {
        chacha20::decrypt_prepend_nonce(&self.bytes, blob)
    }
}

/// Derive the session key for a peer from our static secret and their
/// public key.
///
/// Both sides arrive at the same key because X25519 is commutative over
/// the two static keys.
pub fn derive_session_key(
    our_secret: &X25519StaticSecret,
    their_public: &X25519PublicKey,
) -> Result<SessionKey> {
    let shared = our_secret.diffie_hellman(their_public);
    expand(&shared, SESSION_INFO.as_bytes())
}

/// Derive the channel content key for a given key epoch.
///
/// `ikm` is the channel's X25519 encryption private key; the epoch is baked
/// into the info string so rotating the key and bumping the epoch both
/// change the derived content key.
pub fn derive_content_key(encryption_private: &X25519StaticSecret, epoch: u64) -> Result<SessionKey> {
    let info = format!("zajel_channel_content_epoch_{epoch}");
    let ikm = encryption_private.to_bytes();
    let hk = Hkdf::<Sha256>::new(None, &ikm);
    let mut okm = [0u8; 32];
    hk.expand(info.as_bytes(), &mut okm)
        .map_err(|e| CryptoError::Internal(format!("hkdf expand: {e}")))?;
    Ok(SessionKey::from_bytes(okm))
}

fn expand(shared: &SharedSecret, info: &[u8]) -> Result<SessionKey> {
    let hk = Hkdf::<Sha256>::new(None, shared.as_bytes());
    let mut okm = [0u8; 32];
    hk.expand(info, &mut okm)
        .map_err(|e| CryptoError::Internal(format!("hkdf expand: {e}")))?;
    Ok(SessionKey::from_bytes(okm))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_key_symmetric() {
        let alice = X25519StaticSecret::random();
        let bob = X25519StaticSecret::random();

        let k_ab = derive_session_key(&alice, &bob.public_key()).expect("derive");
        let k_ba = derive_session_key(&bob, &alice.public_key()).expect("derive");
        assert_eq!(k_ab.as_bytes(), k_ba.as_bytes());
    }

    #[test]
    fn test_session_key_stable_for_identity_pair() {
        // Documented v1 limitation: no ephemeral component.
        let alice = X25519StaticSecret::random();
        let bob = X25519StaticSecret::random();

        let k1 = derive_session_key(&alice, &bob.public_key()).expect("derive");
        let k2 = derive_session_key(&alice, &bob.public_key()).expect("derive");
        assert_eq!(k1.as_bytes(), k2.as_bytes());
    }

    #[test]
    fn test_session_encrypt_decrypt() {
        let alice = X25519StaticSecret::random();
        let bob = X25519StaticSecret::random();

        let sender = derive_session_key(&alice, &bob.public_key()).expect("derive");
        let receiver = derive_session_key(&bob, &alice.public_key()).expect("derive");

        let blob = sender.encrypt(b"hi bob").expect("encrypt");
        assert_eq!(receiver.decrypt(&blob).expect("decrypt"), b"hi bob");
    }

    #[test]
    fn test_content_key_changes_with_epoch() {
        let channel_key = X25519StaticSecret::random();
        let k0 = derive_content_key(&channel_key, 0).expect("epoch 0");
        let k1 = derive_content_key(&channel_key, 1).expect("epoch 1");
        assert_ne!(k0.as_bytes(), k1.as_bytes());
    }

    #[test]
    fn test_content_key_deterministic() {
        let channel_key = X25519StaticSecret::random();
        let a = derive_content_key(&channel_key, 3).expect("a");
        let b = derive_content_key(&channel_key, 3).expect("b");
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_different_peers_different_keys() {
        let alice = X25519StaticSecret::random();
        let bob = X25519StaticSecret::random();
        let carol = X25519StaticSecret::random();

        let k_ab = derive_session_key(&alice, &bob.public_key()).expect("ab");
        let k_ac = derive_session_key(&alice, &carol.public_key()).expect("ac");
        assert_ne!(k_ab.as_bytes(), k_ac.as_bytes());
    }
}
