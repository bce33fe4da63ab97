//! Channel invites and subscription.
//!
//! An invite carries the signed manifest plus the content encryption
//! private key, encoded into a `zajel://channel/...` link (see
//! [`zajel_types::links`]). Subscribing verifies the manifest signature and
//! pins the owner key: every later manifest update must come from the same
//! owner.

use zajel_crypto::x25519::X25519StaticSecret;
use zajel_types::channel::ChannelManifest;
use zajel_types::links::ChannelInvite;

use crate::manifest::{verify_manifest, verify_manifest_pinned, OwnedChannel};
use crate::{ChannelError, Result};

/// A subscribed channel: manifest, content key, and the TOFU owner pin.
pub struct SubscribedChannel {
    /// The manifest as of the last accepted update.
    pub manifest: ChannelManifest,
    /// Content encryption private key from the invite.
    pub encryption_secret: X25519StaticSecret,
    /// Owner key pinned at subscribe time, hex-encoded.
    pub pinned_owner_key: String,
}

/// Create an invite link for a channel we own.
pub fn create_invite(channel: &OwnedChannel) -> Result<String> {
    let invite = ChannelInvite {
        m: channel.manifest.clone(),
        k: hex::encode(channel.encryption_secret.to_bytes()),
    };
    Ok(invite.to_uri()?)
}

/// Subscribe from an invite link.
///
/// The manifest signature is verified and the owner key pinned; a link
/// with a broken signature is rejected outright.
pub fn subscribe(link: &str) -> Result<SubscribedChannel> {
    let invite = ChannelInvite::parse(link)?;
    verify_manifest(&invite.m)?;

    let key_bytes: [u8; 32] = hex::decode(&invite.k)
        .map_err(|e| ChannelError::Encoding(format!("invite key: {e}")))?
        .try_into()
        .map_err(|_| ChannelError::Encoding("invite key must be 32 bytes".into()))?;

    let pinned_owner_key = invite.m.owner_key.clone();
    Ok(SubscribedChannel {
        manifest: invite.m,
        encryption_secret: X25519StaticSecret::from_bytes(key_bytes),
        pinned_owner_key,
    })
}

impl SubscribedChannel {
    /// Accept a manifest update (rule change, admin change, key rotation).
    ///
    /// The update must verify against the pinned owner key. On a key
    /// rotation the subscriber also needs the new encryption secret,
    /// delivered out-of-band; callers pass it when the epoch advanced.
    pub fn apply_manifest_update(
        &mut self,
        manifest: ChannelManifest,
        new_encryption_secret: Option<X25519StaticSecret>,
    ) -> Result<()> {
        verify_manifest_pinned(&manifest, &self.pinned_owner_key)?;

        if manifest.key_epoch > self.manifest.key_epoch {
            match new_encryption_secret {
                Some(secret) => self.encryption_secret = secret,
                None => {
                    return Err(ChannelError::Encoding(
                        "key epoch advanced without a new encryption key".into(),
                    ))
                }
            }
        }

        self.manifest = manifest;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::create_channel;
    use zajel_types::channel::ChannelRules;

    #[test]
    fn test_invite_subscribe_roundtrip() {
        let channel = create_channel("news", "daily", ChannelRules::default()).expect("create");
        let link = create_invite(&channel).expect("invite");

        let subscribed = subscribe(&link).expect("subscribe");
        assert_eq!(subscribed.manifest, channel.manifest);
        assert_eq!(subscribed.pinned_owner_key, channel.manifest.owner_key);
        assert_eq!(
            subscribed.encryption_secret.to_bytes(),
            channel.encryption_secret.to_bytes()
        );
    }

    #[test]
    fn test_tampered_invite_rejected() {
        let channel = create_channel("news", "", ChannelRules::default()).expect("create");
        let mut invite = ChannelInvite {
            m: channel.manifest.clone(),
            k: hex::encode(channel.encryption_secret.to_bytes()),
        };
        invite.m.name = "evil".into();

        let link = invite.to_uri().expect("uri");
        assert!(subscribe(&link).is_err());
    }

    #[test]
    fn test_invite_with_bad_key_rejected() {
        let channel = create_channel("news", "", ChannelRules::default()).expect("create");
        let invite = ChannelInvite {
            m: channel.manifest.clone(),
            k: "tooshort".into(),
        };
        assert!(subscribe(&invite.to_uri().expect("uri")).is_err());
    }

    #[test]
    fn test_manifest_update_same_owner_accepted() {
        let mut channel = create_channel("news", "", ChannelRules::default()).expect("create");
        let link = create_invite(&channel).expect("invite");
        let mut subscribed = subscribe(&link).expect("subscribe");

        channel
            .update_rules(ChannelRules {
                replies_enabled: true,
                ..ChannelRules::default()
            })
            .expect("update");

        subscribed
            .apply_manifest_update(channel.manifest.clone(), None)
            .expect("apply");
        assert!(subscribed.manifest.rules.replies_enabled);
    }

    #[test]
    fn test_manifest_update_different_owner_rejected() {
        let channel = create_channel("news", "", ChannelRules::default()).expect("create");
        let other = create_channel("other", "", ChannelRules::default()).expect("create");

        let link = create_invite(&channel).expect("invite");
        let mut subscribed = subscribe(&link).expect("subscribe");

        assert!(subscribed
            .apply_manifest_update(other.manifest.clone(), None)
            .is_err());
    }

    #[test]
    fn test_epoch_advance_requires_new_key() {
        let mut channel = create_channel("news", "", ChannelRules::default()).expect("create");
        let admin = zajel_crypto::ed25519::SigningKey::generate();
        channel
            .appoint_admin(&admin.verifying_key().to_hex(), "a")
            .expect("appoint");

        let link = create_invite(&channel).expect("invite");
        let mut subscribed = subscribe(&link).expect("subscribe");

        channel
            .remove_admin(&admin.verifying_key().to_hex())
            .expect("remove");

        // Without the rotated key the update is refused.
        assert!(subscribed
            .apply_manifest_update(channel.manifest.clone(), None)
            .is_err());

        // With it, the subscriber follows the rotation.
        subscribed
            .apply_manifest_update(
                channel.manifest.clone(),
                Some(X25519StaticSecret::from_bytes(
                    channel.encryption_secret.to_bytes(),
                )),
            )
            .expect("apply");
        assert_eq!(subscribed.manifest.key_epoch, 1);
    }
}
