//! X25519 key agreement (RFC 7748).
//!
//! Identity keys are static X25519 secrets. Session establishment is
//! static-static Diffie-Hellman (see [`crate::kdf::derive_session_key`]);
//! sealed boxes use an ephemeral secret on the sender side.

use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};
use zeroize::Zeroize;

use crate::{CryptoError, Result};

/// An X25519 static secret key (long-lived identity or channel key).
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct X25519StaticSecret {
    inner: StaticSecret,
}

/// An X25519 public key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct X25519PublicKey {
    bytes: [u8; 32],
}

/// An X25519 shared secret.
#[derive(Zeroize)]
#[zeroize(drop)]
pub struct SharedSecret {
    bytes: [u8; 32],
}

impl X25519StaticSecret {
    /// Generate a new random static secret.
    pub fn random() -> Self {
        Self {
            inner: StaticSecret::random_from_rng(OsRng),
        }
    }

    /// Create from raw bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self {
            inner: StaticSecret::from(bytes),
        }
    }

    /// Get the raw bytes of this secret.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.inner.to_bytes()
    }

    /// Compute the corresponding public key.
    pub fn public_key(&self) -> X25519PublicKey {
        let pk = PublicKey::from(&self.inner);
        X25519PublicKey {
            bytes: pk.to_bytes(),
        }
    }

    /// Perform Diffie-Hellman key agreement.
    pub fn diffie_hellman(&self, their_public: &X25519PublicKey) -> SharedSecret {
        let pk = PublicKey::from(their_public.bytes);
        let shared = self.inner.diffie_hellman(&pk);
        SharedSecret {
            bytes: *shared.as_bytes(),
        }
    }
}

impl X25519PublicKey {
    /// Create from raw bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self { bytes }
    }

    /// Parse from a hex string.
    pub fn from_hex(s: &str) -> Result<Self> {
        let decoded =
            hex::decode(s).map_err(|e| CryptoError::InvalidEncoding(format!("x25519 hex: {e}")))?;
        let bytes: [u8; 32] = decoded
            .try_into()
            .map_err(|_| CryptoError::InvalidEncoding("x25519 key must be 32 bytes".into()))?;
        Ok(Self { bytes })
    }

    /// Hex-encode.
    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }

    /// Get the raw bytes.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.bytes
    }

    /// Get the raw bytes as a slice.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }
}

impl SharedSecret {
    /// Get the raw bytes of the shared secret.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }
}

/// Perform an ephemeral X25519 key exchange.
///
/// Returns (ephemeral_public_key, shared_secret). Used by sealed boxes.
pub fn ephemeral_key_exchange(their_public: &X25519PublicKey) -> (X25519PublicKey, SharedSecret) {
    let secret = EphemeralSecret::random_from_rng(OsRng);
    let public = PublicKey::from(&secret);
    let pk = PublicKey::from(their_public.bytes);
    let shared = secret.diffie_hellman(&pk);

    (
        X25519PublicKey {
            bytes: public.to_bytes(),
        },
        SharedSecret {
            bytes: *shared.as_bytes(),
        },
    )
}
