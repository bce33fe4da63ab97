//! Relay control frames.
//!
//! JSON frames exchanged over a relay control channel, tagged by `type`.
//! The handshake is the first frame a client sends after its data channel
//! opens; introductions carry sealed payloads the relay cannot read.

use serde::{Deserialize, Serialize};

use crate::{RelayError, Result};

/// Frames on a relay control channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayFrame {
    /// First frame after channel open: announce our source id.
    RelayHandshake { source_id: String },
    /// Ask the relay to forward a sealed payload to a source id.
    Introduction {
        target_source_id: String,
        #[serde(with = "zajel_types::chunk::base64_bytes")]
        payload: Vec<u8>,
    },
    /// Relay-forwarded introduction, delivered to the target.
    IntroductionForward {
        from_source_id: String,
        #[serde(with = "zajel_types::chunk::base64_bytes")]
        payload: Vec<u8>,
    },
    /// The introduction target was unknown.
    IntroductionError { error: String },
}

impl RelayFrame {
    /// Serialize to the wire form.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| RelayError::InvalidFrame(e.to_string()))
    }

    /// Parse a wire frame.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| RelayError::InvalidFrame(e.to_string()))
    }
}

/// Error string used for unknown introduction targets.
pub const TARGET_NOT_FOUND: &str = "target_not_found";
