//! The connection handshake payload and identity resolution.
//!
//! After the data channel opens, each side sends a JSON handshake with its
//! public key, stable id, and username. Peers running pre-stable-id builds
//! omit the id; for those we derive one from the public key so the trust
//! store still has a single key per peer during the migration.

use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use zajel_types::identity::StableId;

use crate::{ConnectionError, Result};

/// The JSON handshake both sides exchange after channel open.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakePayload {
    /// X25519 public key, base64-encoded.
    pub public_key: String,
    /// Stable id, hex-encoded. Absent on legacy peers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stable_id: Option<String>,
    /// Display username.
    pub username: String,
}

impl HandshakePayload {
    /// Serialize to the wire form.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| ConnectionError::HandshakeFailed(e.to_string()))
    }

    /// Parse a handshake frame.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| ConnectionError::HandshakeFailed(e.to_string()))
    }

    /// Decode the public key. Malformed base64 or wrong length is a
    /// handshake failure, never a panic.
    pub fn public_key_bytes(&self) -> Result<[u8; 32]> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(self.public_key.trim())
            .map_err(|e| ConnectionError::HandshakeFailed(format!("public key: {e}")))?;
        bytes
            .try_into()
            .map_err(|_| ConnectionError::HandshakeFailed("public key must be 32 bytes".into()))
    }
}

/// The resolved identity of a handshaking peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResolvedIdentity {
    /// The stable id, taken from the handshake or derived.
    pub stable_id: StableId,
    /// True when the id was derived from the public key (legacy peer).
    pub legacy: bool,
}

/// Resolve the stable identity from a handshake.
///
/// Legacy peers without a stable id get `SHA-256(public_key)[0..8]`.
pub fn resolve_identity(payload: &HandshakePayload) -> Result<ResolvedIdentity> {
    if let Some(id_hex) = &payload.stable_id {
        let stable_id = StableId::from_hex(id_hex)
            .map_err(|e| ConnectionError::HandshakeFailed(format!("stable id: {e}")))?;
        return Ok(ResolvedIdentity {
            stable_id,
            legacy: false,
        });
    }

    let key = payload.public_key_bytes()?;
    let digest = Sha256::digest(key);
    let mut id_bytes = [0u8; 8];
    id_bytes.copy_from_slice(&digest[..8]);
    Ok(ResolvedIdentity {
        stable_id: StableId::from_bytes(id_bytes),
        legacy: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_b64(byte: u8) -> String {
        base64::engine::general_purpose::STANDARD.encode([byte; 32])
    }

    #[test]
    fn test_json_roundtrip() {
        let payload = HandshakePayload {
            public_key: key_b64(1),
            stable_id: Some("a1b2c3d4e5f60718".into()),
            username: "alice".into(),
        };
        let restored =
            HandshakePayload::from_json(&payload.to_json().expect("json")).expect("parse");
        assert_eq!(payload, restored);
    }

    #[test]
    fn test_stable_id_field_omitted_when_none() {
        let payload = HandshakePayload {
            public_key: key_b64(1),
            stable_id: None,
            username: "bob".into(),
        };
        assert!(!payload.to_json().expect("json").contains("stable_id"));
    }

    #[test]
    fn test_resolve_modern_peer() {
        let payload = HandshakePayload {
            public_key: key_b64(1),
            stable_id: Some("a1b2c3d4e5f60718".into()),
            username: "alice".into(),
        };
        let resolved = resolve_identity(&payload).expect("resolve");
        assert!(!resolved.legacy);
        assert_eq!(resolved.stable_id.to_hex(), "a1b2c3d4e5f60718");
    }

    #[test]
    fn test_resolve_legacy_peer_is_deterministic() {
        let payload = HandshakePayload {
            public_key: key_b64(7),
            stable_id: None,
            username: "old-client".into(),
        };
        let a = resolve_identity(&payload).expect("resolve");
        let b = resolve_identity(&payload).expect("resolve");
        assert!(a.legacy);
        assert_eq!(a.stable_id, b.stable_id);

        // Matches SHA-256(public key) prefix.
        let digest = Sha256::digest([7u8; 32]);
        assert_eq!(&a.stable_id.to_bytes()[..], &digest[..8]);
    }

    #[test]
    fn test_malformed_key_is_error_not_panic() {
        let payload = HandshakePayload {
            public_key: "%%%".into(),
            stable_id: None,
            username: "x".into(),
        };
        assert!(resolve_identity(&payload).is_err());

        let short = HandshakePayload {
            public_key: base64::engine::general_purpose::STANDARD.encode([1u8; 4]),
            stable_id: None,
            username: "x".into(),
        };
        assert!(resolve_identity(&short).is_err());
    }

    #[test]
    fn test_malformed_stable_id_rejected() {
        let payload = HandshakePayload {
            public_key: key_b64(1),
            stable_id: Some("nothex".into()),
            username: "x".into(),
        };
        assert!(resolve_identity(&payload).is_err());
    }
}
