//! Manifest lifecycle: creation, signing, admin delegation, key rotation.
//!
//! Only the owner key can mutate a manifest. Admins may author chunks but
//! cannot rotate keys, modify the manifest, or appoint other admins.
//! Removing an admin rotates the content encryption keypair and bumps the
//! key epoch: chunks the removed admin already published remain valid
//! (their signatures were correct at the time), but anything it publishes
//! afterwards fails subscriber verification.

use sha2::{Digest, Sha256};

use zajel_crypto::ed25519::{Signature, SigningKey, VerifyingKey};
use zajel_crypto::x25519::X25519StaticSecret;
use zajel_types::channel::{AdminKey, ChannelManifest, ChannelRules};

use crate::{ChannelError, Result};

/// An owned channel: the manifest plus the private key material that only
/// the owner holds. Secrets are persisted in secure storage, never in the
/// channels table.
pub struct OwnedChannel {
    /// The signed manifest.
    pub manifest: ChannelManifest,
    /// Owner Ed25519 signing key.
    pub owner_signing: SigningKey,
    /// Current X25519 content encryption secret.
    pub encryption_secret: X25519StaticSecret,
}

/// Compute a channel id from its owner key: first 16 bytes of
/// SHA-256(owner public key), hex-encoded.
pub fn channel_id_from_owner(owner: &VerifyingKey) -> String {
    let digest = Sha256::digest(owner.to_bytes());
    hex::encode(&digest[..16])
}

/// Sign a manifest in place with the owner key.
pub fn sign_manifest(manifest: &mut ChannelManifest, owner: &SigningKey) -> Result<()> {
    let signable = manifest.signable_json()?;
    manifest.signature = owner.sign(&signable).to_hex();
    Ok(())
}

/// Verify a manifest signature against its own `owner_key` field.
pub fn verify_manifest(manifest: &ChannelManifest) -> Result<()> {
    let owner = VerifyingKey::from_hex(&manifest.owner_key)?;
    let signature = Signature::from_hex(&manifest.signature)?;
    let signable = manifest.signable_json()?;
    owner.verify(&signable, &signature)?;
    Ok(())
}

/// Verify a manifest against the owner key pinned at subscribe time.
///
/// A valid signature from a *different* owner key is still a rejection —
/// the pin is what stops a relay from swapping the whole manifest.
pub fn verify_manifest_pinned(manifest: &ChannelManifest, pinned_owner_hex: &str) -> Result<()> {
    if manifest.owner_key != pinned_owner_hex {
        return Err(ChannelError::Unauthorized(
            "manifest owner key does not match pinned key".into(),
        ));
    }
    verify_manifest(manifest)
}

/// Create a new channel: fresh owner and encryption keypairs, epoch 0,
/// signed manifest.
pub fn create_channel(name: &str, description: &str, rules: ChannelRules) -> Result<OwnedChannel> {
    let owner_signing = SigningKey::generate();
    let encryption_secret = X25519StaticSecret::random();
    let owner_key = owner_signing.verifying_key();

    let mut manifest = ChannelManifest {
        channel_id: channel_id_from_owner(&owner_key),
        name: name.to_string(),
        description: description.to_string(),
        owner_key: owner_key.to_hex(),
        admin_keys: Vec::new(),
        current_encrypt_key: encryption_secret.public_key().to_hex(),
        key_epoch: 0,
        rules,
        signature: String::new(),
    };
    sign_manifest(&mut manifest, &owner_signing)?;

    Ok(OwnedChannel {
        manifest,
        owner_signing,
        encryption_secret,
    })
}

impl OwnedChannel {
    /// Appoint an admin key. Owner only; duplicates and the owner key
    /// itself are rejected.
    pub fn appoint_admin(&mut self, admin_key_hex: &str, label: &str) -> Result<()> {
        // Reject malformed keys before they enter the manifest.
        VerifyingKey::from_hex(admin_key_hex)?;

        if admin_key_hex == self.manifest.owner_key {
            return Err(ChannelError::AdminIsOwner);
        }
        if self.manifest.admin_keys.iter().any(|a| a.key == admin_key_hex) {
            return Err(ChannelError::AdminExists);
        }

        self.manifest.admin_keys.push(AdminKey {
            key: admin_key_hex.to_string(),
            label: label.to_string(),
        });
        sign_manifest(&mut self.manifest, &self.owner_signing)
    }

    /// Remove an admin key, rotate the encryption keypair, and bump the
    /// key epoch.
    pub fn remove_admin(&mut self, admin_key_hex: &str) -> Result<()> {
        let before = self.manifest.admin_keys.len();
        self.manifest.admin_keys.retain(|a| a.key != admin_key_hex);
        if self.manifest.admin_keys.len() == before {
            return Err(ChannelError::AdminNotFound);
        }

        self.encryption_secret = X25519StaticSecret::random();
        self.manifest.current_encrypt_key = self.encryption_secret.public_key().to_hex();
        self.manifest.key_epoch += 1;
        sign_manifest(&mut self.manifest, &self.owner_signing)
    }

    /// Replace the channel rules and re-sign.
    pub fn update_rules(&mut self, rules: ChannelRules) -> Result<()> {
        self.manifest.rules = rules;
        sign_manifest(&mut self.manifest, &self.owner_signing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn admin_key() -> String {
        SigningKey::generate().verifying_key().to_hex()
    }

    #[test]
    fn test_create_channel_is_verified() {
        let channel = create_channel("news", "daily", ChannelRules::default()).expect("create");
        assert_eq!(channel.manifest.key_epoch, 0);
        assert_eq!(channel.manifest.channel_id.len(), 32);
        verify_manifest(&channel.manifest).expect("verify");
    }

    #[test]
    fn test_channel_id_matches_owner_fingerprint() {
        let channel = create_channel("news", "", ChannelRules::default()).expect("create");
        let owner = VerifyingKey::from_hex(&channel.manifest.owner_key).expect("owner");
        assert_eq!(channel.manifest.channel_id, channel_id_from_owner(&owner));
    }

    #[test]
    fn test_manifest_tamper_detected() {
        let channel = create_channel("news", "", ChannelRules::default()).expect("create");

        let mut tampered = channel.manifest.clone();
        tampered.name = "fake news".into();
        assert!(verify_manifest(&tampered).is_err());

        let mut epoch_bumped = channel.manifest.clone();
        epoch_bumped.key_epoch = 7;
        assert!(verify_manifest(&epoch_bumped).is_err());
    }

    #[test]
    fn test_appoint_admin_re_signs() {
        let mut channel = create_channel("news", "", ChannelRules::default()).expect("create");
        let key = admin_key();
        channel.appoint_admin(&key, "co-host").expect("appoint");

        assert!(channel.manifest.is_authorized_author(&key));
        verify_manifest(&channel.manifest).expect("still valid");
    }

    #[test]
    fn test_appoint_duplicate_rejected() {
        let mut channel = create_channel("news", "", ChannelRules::default()).expect("create");
        let key = admin_key();
        channel.appoint_admin(&key, "a").expect("first");
        assert!(matches!(
            channel.appoint_admin(&key, "b"),
            Err(ChannelError::AdminExists)
        ));
    }

    #[test]
    fn test_appoint_owner_rejected() {
        let mut channel = create_channel("news", "", ChannelRules::default()).expect("create");
        let owner_key = channel.manifest.owner_key.clone();
        assert!(matches!(
            channel.appoint_admin(&owner_key, "self"),
            Err(ChannelError::AdminIsOwner)
        ));
    }

    #[test]
    fn test_appoint_malformed_key_rejected() {
        let mut channel = create_channel("news", "", ChannelRules::default()).expect("create");
        assert!(channel.appoint_admin("zz-not-hex", "bad").is_err());
    }

    #[test]
    fn test_remove_admin_rotates_key_and_epoch() {
        let mut channel = create_channel("news", "", ChannelRules::default()).expect("create");
        let key = admin_key();
        channel.appoint_admin(&key, "a").expect("appoint");

        let old_encrypt_key = channel.manifest.current_encrypt_key.clone();
        let old_epoch = channel.manifest.key_epoch;

        channel.remove_admin(&key).expect("remove");

        assert_eq!(channel.manifest.key_epoch, old_epoch + 1);
        assert_ne!(channel.manifest.current_encrypt_key, old_encrypt_key);
        assert!(!channel.manifest.is_authorized_author(&key));
        verify_manifest(&channel.manifest).expect("still valid");
    }

    #[test]
    fn test_remove_unknown_admin_rejected() {
        let mut channel = create_channel("news", "", ChannelRules::default()).expect("create");
        assert!(matches!(
            channel.remove_admin(&admin_key()),
            Err(ChannelError::AdminNotFound)
        ));
    }

    #[test]
    fn test_update_rules_re_signs() {
        let mut channel = create_channel("news", "", ChannelRules::default()).expect("create");
        let rules = ChannelRules {
            replies_enabled: true,
            ..ChannelRules::default()
        };
        channel.update_rules(rules).expect("update");
        assert!(channel.manifest.rules.replies_enabled);
        verify_manifest(&channel.manifest).expect("still valid");
    }

    #[test]
    fn test_pinned_verification_rejects_different_owner() {
        let channel = create_channel("news", "", ChannelRules::default()).expect("create");
        let other = create_channel("other", "", ChannelRules::default()).expect("create");

        verify_manifest_pinned(&channel.manifest, &channel.manifest.owner_key)
            .expect("own pin");
        assert!(verify_manifest_pinned(&channel.manifest, &other.manifest.owner_key).is_err());
    }
}
