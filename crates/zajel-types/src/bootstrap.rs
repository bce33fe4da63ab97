//! Bootstrap discovery wire types.
//!
//! The bootstrap server returns its server list signed; clients pin the
//! bootstrap Ed25519 key in their binary and hard-fail on a bad
//! signature. The signable form is the compact JSON of the `servers`
//! array alone.

use serde::{Deserialize, Serialize};

use crate::{Result, TypesError};

/// Maximum server id length.
pub const MAX_SERVER_ID_LEN: usize = 256;
/// Maximum endpoint length.
pub const MAX_ENDPOINT_LEN: usize = 2048;
/// Maximum public key length.
pub const MAX_PUBLIC_KEY_LEN: usize = 256;
/// Maximum region length.
pub const MAX_REGION_LEN: usize = 64;

/// One signaling server in the bootstrap list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerEntry {
    /// Registry id.
    pub id: String,
    /// WebSocket endpoint (`ws://` or `wss://`).
    pub endpoint: String,
    /// The server's public key.
    pub public_key: String,
    /// Deployment region label.
    pub region: String,
    /// Unix timestamp of the last heartbeat.
    pub last_heartbeat: u64,
}

impl ServerEntry {
    /// Validate lengths, URL shape, and scheme.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() || self.id.len() > MAX_SERVER_ID_LEN {
            return Err(TypesError::Validation("server id length".into()));
        }
        if self.endpoint.len() > MAX_ENDPOINT_LEN {
            return Err(TypesError::Validation("endpoint length".into()));
        }
        let rest = self
            .endpoint
            .strip_prefix("wss://")
            .or_else(|| self.endpoint.strip_prefix("ws://"))
            .ok_or_else(|| TypesError::Validation("endpoint scheme must be ws or wss".into()))?;
        let host = rest.split('/').next().unwrap_or("");
        if host.is_empty() || host.chars().any(|c| c.is_whitespace()) {
            return Err(TypesError::Validation("endpoint host".into()));
        }
        if self.public_key.is_empty() || self.public_key.len() > MAX_PUBLIC_KEY_LEN {
            return Err(TypesError::Validation("public key length".into()));
        }
        if self.region.len() > MAX_REGION_LEN {
            return Err(TypesError::Validation("region length".into()));
        }
        Ok(())
    }
}

/// The signed server list response of `GET /servers`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedServerList {
    pub servers: Vec<ServerEntry>,
    /// Ed25519 signature over [`signable_bytes`] of `servers`, hex.
    pub signature: String,
}

/// The canonical signable form: compact JSON of the servers array.
pub fn signable_bytes(servers: &[ServerEntry]) -> Result<Vec<u8>> {
    serde_json::to_vec(servers)
        .map_err(|e| TypesError::InvalidEncoding(format!("server list: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> ServerEntry {
        ServerEntry {
            id: "eu-1".into(),
            endpoint: "wss://signal.zajel.app/ws".into(),
            public_key: "11".repeat(32),
            region: "eu-west".into(),
            last_heartbeat: 1_700_000_000,
        }
    }

    #[test]
    fn test_valid_entry() {
        entry().validate().expect("valid");
    }

    #[test]
    fn test_ws_scheme_allowed() {
        let mut e = entry();
        e.endpoint = "ws://localhost:8420/ws".into();
        e.validate().expect("valid");
    }

    #[test]
    fn test_bad_scheme_rejected() {
        for endpoint in ["https://x.example", "ftp://x", "signal.zajel.app"] {
            let mut e = entry();
            e.endpoint = endpoint.into();
            assert!(e.validate().is_err(), "{endpoint}");
        }
    }

    #[test]
    fn test_empty_id_rejected() {
        let mut e = entry();
        e.id = String::new();
        assert!(e.validate().is_err());
    }

    #[test]
    fn test_length_limits() {
        let mut e = entry();
        e.id = "x".repeat(MAX_SERVER_ID_LEN + 1);
        assert!(e.validate().is_err());

        let mut e = entry();
        e.endpoint = format!("wss://{}", "h".repeat(MAX_ENDPOINT_LEN));
        assert!(e.validate().is_err());

        let mut e = entry();
        e.region = "r".repeat(MAX_REGION_LEN + 1);
        assert!(e.validate().is_err());
    }

    #[test]
    fn test_empty_host_rejected() {
        let mut e = entry();
        e.endpoint = "wss:///path".into();
        assert!(e.validate().is_err());
    }

    #[test]
    fn test_signable_bytes_deterministic() {
        let servers = vec![entry()];
        assert_eq!(
            signable_bytes(&servers).expect("a"),
            signable_bytes(&servers).expect("b")
        );
    }
}
