//! Ed25519 signing and verification (RFC 8032).
//!
//! Ed25519 authenticates everything in the broadcast-channel plane: channel
//! manifests, delegated admin keys, and individual chunk ciphertexts. The
//! bootstrap server list is signed with it as well.

use ed25519_dalek::{Signer, Verifier};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::{CryptoError, Result};

/// An Ed25519 signing key (private key).
pub struct SigningKey {
    inner: ed25519_dalek::SigningKey,
}

impl Clone for SigningKey {
    fn clone(&self) -> Self {
        Self {
            inner: ed25519_dalek::SigningKey::from_bytes(&self.inner.to_bytes()),
        }
    }
}

impl Drop for SigningKey {
    fn drop(&mut self) {
        let mut bytes = self.inner.to_bytes();
        bytes.zeroize();
    }
}

/// An Ed25519 verification key (public key).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyingKey {
    inner: ed25519_dalek::VerifyingKey,
}

/// An Ed25519 signature.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    inner: ed25519_dalek::Signature,
}

impl SigningKey {
    /// Generate a new random signing key.
    pub fn generate() -> Self {
        let mut csprng = rand::rngs::OsRng;
        Self {
            inner: ed25519_dalek::SigningKey::generate(&mut csprng),
        }
    }

    /// Create a signing key from raw bytes.
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self {
            inner: ed25519_dalek::SigningKey::from_bytes(bytes),
        }
    }

    /// Get the raw bytes of this signing key.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.inner.to_bytes()
    }

    /// Get the corresponding verifying key.
    pub fn verifying_key(&self) -> VerifyingKey {
        VerifyingKey {
            inner: self.inner.verifying_key(),
        }
    }

    /// Sign a message.
    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature {
            inner: self.inner.sign(message),
        }
    }
}

impl VerifyingKey {
    /// Create a verifying key from raw bytes.
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self> {
        let inner = ed25519_dalek::VerifyingKey::from_bytes(bytes)
            .map_err(|e| CryptoError::InvalidEncoding(e.to_string()))?;
        Ok(Self { inner })
    }

    /// Parse from a hex string.
    pub fn from_hex(s: &str) -> Result<Self> {
        let decoded = hex::decode(s)
            .map_err(|e| CryptoError::InvalidEncoding(format!("ed25519 hex: {e}")))?;
        let bytes: [u8; 32] = decoded
            .try_into()
            .map_err(|_| CryptoError::InvalidEncoding("ed25519 key must be 32 bytes".into()))?;
        Self::from_bytes(&bytes)
    }

    /// Hex-encode.
    pub fn to_hex(&self) -> String {
        hex::encode(self.inner.to_bytes())
    }

    /// Get the raw bytes of this verifying key.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.inner.to_bytes()
    }

    /// Verify a signature on a message.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<()> {
        self.inner
            .verify(message, &signature.inner)
            .map_err(|_| CryptoError::BadSignature)
    }
}

impl Signature {
    /// Create a signature from raw bytes.
    pub fn from_bytes(bytes: &[u8; 64]) -> Self {
        Self {
            inner: ed25519_dalek::Signature::from_bytes(bytes),
        }
    }

    /// Parse from a hex string.
    pub fn from_hex(s: &str) -> Result<Self> {
        let decoded = hex::decode(s)
            .map_err(|e| CryptoError::InvalidEncoding(format!("signature hex: {e}")))?;
        let bytes: [u8; 64] = decoded
            .try_into()
            .map_err(|_| CryptoError::InvalidEncoding("signature must be 64 bytes".into()))?;
        Ok(Self::from_bytes(&bytes))
    }

    /// Hex-encode.
    pub fn to_hex(&self) -> String {
        hex::encode(self.inner.to_bytes())
    }

    /// Get the raw bytes of this signature.
    pub fn to_bytes(&self) -> [u8; 64] {
        self.inner.to_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify_roundtrip() {
        let sk = SigningKey::generate();
        let sig = sk.sign(b"manifest body");
        sk.verifying_key()
            .verify(b"manifest body", &sig)
            .expect("verify");
    }

    #[test]
    fn test_wrong_message_fails() {
        let sk = SigningKey::generate();
        let sig = sk.sign(b"original");
        assert!(matches!(
            sk.verifying_key().verify(b"tampered", &sig),
            Err(CryptoError::BadSignature)
        ));
    }

    #[test]
    fn test_wrong_key_fails() {
        let sig = SigningKey::generate().sign(b"message");
        let other = SigningKey::generate();
        assert!(other.verifying_key().verify(b"message", &sig).is_err());
    }

    #[test]
    fn test_hex_roundtrip() {
        let sk = SigningKey::generate();
        let vk = sk.verifying_key();
        let restored = VerifyingKey::from_hex(&vk.to_hex()).expect("parse");
        assert_eq!(vk, restored);

        let sig = sk.sign(b"x");
        let restored_sig = Signature::from_hex(&sig.to_hex()).expect("parse");
        assert_eq!(sig, restored_sig);
    }

    #[test]
    fn test_malformed_hex_rejected() {
        assert!(VerifyingKey::from_hex("nothex").is_err());
        assert!(Signature::from_hex("aabb").is_err());
    }

    #[test]
    fn test_signing_key_bytes_roundtrip() {
        let sk = SigningKey::generate();
        let restored = SigningKey::from_bytes(&sk.to_bytes());
        assert_eq!(
            sk.verifying_key().to_bytes(),
            restored.verifying_key().to_bytes()
        );
    }
}
