//! Deep links and QR payloads.
//!
//! Pairing links carry a stable id (hex or base58) with an optional safety
//! number for first-use verification. Channel invites carry the manifest
//! plus the content encryption private key, base64url-encoded with optional
//! padding; scanners may inject whitespace, which is stripped.

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::channel::ChannelManifest;
use crate::identity::StableId;
use crate::{Result, TypesError};

/// URI scheme for all zajel deep links.
pub const SCHEME: &str = "zajel";

/// A parsed pairing link.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PairingLink {
    /// The peer to pair with.
    pub stable_id: StableId,
    /// Safety number for first-use verification, when present (`?v=`).
    pub safety_number: Option<String>,
}

impl PairingLink {
    /// Render as `zajel://c/<hex>` with optional `?v=`.
    pub fn to_uri(&self) -> String {
        match &self.safety_number {
            Some(v) => format!("{SCHEME}://c/{}?v={v}", self.stable_id.to_hex()),
            None => format!("{SCHEME}://c/{}", self.stable_id.to_hex()),
        }
    }

    /// Parse `zajel://c/<id>` or `https://<domain>/c/<id>`.
    ///
    /// The id component may be 16 hex characters or an 11-character base58
    /// string.
    pub fn parse(uri: &str) -> Result<Self> {
        let trimmed = uri.trim();
        let rest = trimmed
            .strip_prefix("zajel://")
            .or_else(|| {
                trimmed
                    .strip_prefix("https://")
                    .and_then(|r| r.split_once('/').map(|(_, path)| path))
            })
            .ok_or_else(|| TypesError::InvalidLink("unknown scheme".into()))?;

        let path = rest
            .strip_prefix("c/")
            .ok_or_else(|| TypesError::InvalidLink("not a pairing link".into()))?;

        let (id_part, query) = match path.split_once('?') {
            Some((id, q)) => (id, Some(q)),
            None => (path, None),
        };

        if id_part.is_empty() {
            return Err(TypesError::InvalidLink("empty peer id".into()));
        }

        let stable_id = StableId::from_hex(id_part).or_else(|_| StableId::from_base58(id_part))?;

        let safety_number = query.and_then(|q| {
            q.split('&')
                .find_map(|pair| pair.strip_prefix("v=").map(str::to_string))
        });

        Ok(Self {
            stable_id,
            safety_number,
        })
    }
}

/// The JSON body of a channel invite: manifest plus the content encryption
/// private key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelInvite {
    /// The signed manifest.
    pub m: ChannelManifest,
    /// X25519 content encryption private key, hex-encoded.
    pub k: String,
}

impl ChannelInvite {
    /// Render as `zajel://channel/<base64url>` (unpadded).
    pub fn to_uri(&self) -> Result<String> {
        let json = serde_json::to_vec(self)
            .map_err(|e| TypesError::InvalidEncoding(format!("invite: {e}")))?;
        let encoded = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(json);
        Ok(format!("{SCHEME}://channel/{encoded}"))
    }

    /// Parse a channel invite link.
    ///
    /// Whitespace anywhere in the encoded body is stripped and base64
    /// padding is optional.
    pub fn parse(uri: &str) -> Result<Self> {
        let body = uri
            .trim()
            .strip_prefix("zajel://channel/")
            .ok_or_else(|| TypesError::InvalidLink("not a channel invite".into()))?;

        let cleaned: String = body
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .trim_end_matches('=')
            .to_string();

        let json = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(cleaned.as_bytes())
            .map_err(|e| TypesError::InvalidLink(format!("invite base64: {e}")))?;

        serde_json::from_slice(&json)
            .map_err(|e| TypesError::InvalidLink(format!("invite json: {e}")))
    }
}
