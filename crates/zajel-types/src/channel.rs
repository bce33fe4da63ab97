//! Broadcast channels, manifests, and the admin model.
//!
//! A channel is identified by the hex fingerprint of its owner's Ed25519
//! key (first 16 bytes of SHA-256). The manifest is a signed JSON document
//! naming the owner key, delegated admin keys, the current X25519 content
//! encryption key, the key epoch, and the channel rules.
//!
//! The signable form of a manifest is the canonical JSON of all fields
//! except `signature`: fields in declaration order, no whitespace. Struct
//! field order is stable under `serde_json`, so [`ChannelManifest::signable_json`]
//! is deterministic.

use serde::{Deserialize, Serialize};

use crate::{Result, TypesError};

/// Length of a channel id in hex characters (16 bytes).
pub const CHANNEL_ID_HEX_LEN: usize = 32;

/// The local device's role in a channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelRole {
    Owner,
    Admin,
    Subscriber,
}

/// Content rules enforced by subscribers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRules {
    /// Whether subscriber replies are enabled.
    pub replies_enabled: bool,
    /// Whether polls are enabled.
    pub polls_enabled: bool,
    /// Maximum upstream (reply) payload size in bytes.
    pub max_upstream_size: u64,
    /// Allowed upstream content types.
    pub allowed_types: Vec<String>,
}

impl Default for ChannelRules {
    fn default() -> Self {
        Self {
            replies_enabled: false,
            polls_enabled: false,
            max_upstream_size: 4096,
            allowed_types: vec!["text".to_string()],
        }
    }
}

/// A delegated admin key with a human-readable label.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminKey {
    /// Ed25519 public key, hex-encoded.
    pub key: String,
    /// Label shown in the admin list ("laptop", "co-host", ...).
    pub label: String,
}

/// The signed channel manifest.
///
/// Field order here IS the canonical signable order; do not reorder.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelManifest {
    /// Channel id: first 16 bytes of SHA-256(owner key), hex-encoded.
    pub channel_id: String,
    /// Channel display name.
    pub name: String,
    /// Channel description.
    pub description: String,
    /// Owner Ed25519 public key, hex-encoded.
    pub owner_key: String,
    /// Delegated admin keys. Admins may publish; they cannot rotate keys,
    /// modify the manifest, or appoint other admins.
    pub admin_keys: Vec<AdminKey>,
    /// Current X25519 content encryption public key, hex-encoded.
    pub current_encrypt_key: String,
    /// Monotonically increasing count of encryption-key rotations.
    pub key_epoch: u64,
    /// Channel rules.
    pub rules: ChannelRules,
    /// Ed25519 signature over the canonical JSON of all other fields,
    /// hex-encoded. Empty until signed.
    #[serde(default)]
    pub signature: String,
}

impl ChannelManifest {
    /// Canonical signable JSON: every field except `signature`, in
    /// declaration order, no whitespace.
    pub fn signable_json(&self) -> Result<Vec<u8>> {
        let mut unsigned = self.clone();
        unsigned.signature = String::new();
        let value = serde_json::to_value(&unsigned)
            .map_err(|e| TypesError::InvalidEncoding(format!("manifest: {e}")))?;
        let mut map = match value {
            serde_json::Value::Object(map) => map,
            _ => return Err(TypesError::InvalidEncoding("manifest must be an object".into())),
        };
        map.remove("signature");
        serde_json::to_vec(&serde_json::Value::Object(map))
            .map_err(|e| TypesError::InvalidEncoding(format!("manifest: {e}")))
    }

    /// Look up whether a hex-encoded Ed25519 key may author chunks.
    pub fn is_authorized_author(&self, author_key_hex: &str) -> bool {
        self.owner_key == author_key_hex || self.admin_keys.iter().any(|a| a.key == author_key_hex)
    }
}

/// A channel as known to the local device.
///
/// Private key material is referenced here but persisted in secure storage,
/// never in the channels table.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Channel {
    /// Channel id (same as `manifest.channel_id`).
    pub id: String,
    /// The local device's role.
    pub role: ChannelRole,
    /// The signed manifest.
    pub manifest: ChannelManifest,
    /// Unix timestamp the channel was created or subscribed.
    pub created_at: u64,
}
