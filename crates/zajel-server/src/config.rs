//! Server configuration file management.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Complete server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Network settings.
    #[serde(default)]
    pub network: NetworkConfig,
    /// Chunk relay settings.
    #[serde(default)]
    pub relay: RelayConfig,
    /// Bootstrap registry settings.
    #[serde(default)]
    pub bootstrap: BootstrapConfig,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Listen address for HTTP + WebSocket.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Database path. Empty = in-memory (tests only).
    #[serde(default)]
    pub db_path: String,
}

/// Chunk relay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Cache byte budget before LRU eviction kicks in.
    #[serde(default = "default_cache_budget")]
    pub cache_budget_bytes: u64,
    /// Default cache TTL in seconds.
    #[serde(default = "default_chunk_ttl")]
    pub chunk_ttl_secs: u64,
    /// Per-channel TTL overrides, by channel id.
    #[serde(default)]
    pub channel_ttl_overrides: HashMap<String, u64>,
}

/// Bootstrap registry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapConfig {
    /// Ed25519 signing key for the server list, hex-encoded. Empty = a
    /// fresh key is generated at startup (dev only; clients pin keys).
    #[serde(default)]
    pub signing_key_hex: String,
}

fn default_listen_addr() -> String {
    "0.0.0.0:8420".to_string()
}

fn default_cache_budget() -> u64 {
    64 * 1024 * 1024
}

fn default_chunk_ttl() -> u64 {
    900
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            db_path: String::new(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            cache_budget_bytes: default_cache_budget(),
            chunk_ttl_secs: default_chunk_ttl(),
            channel_ttl_overrides: HashMap::new(),
        }
    }
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            signing_key_hex: String::new(),
        }
    }
}

impl ServerConfig {
    /// Load from the default location, falling back to defaults.
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_path();
        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            Ok(toml::from_str(&content)?)
        } else {
            Ok(Self::default())
        }
    }

    /// Effective TTL for a channel.
    pub fn ttl_for_channel(&self, channel_id: &str) -> u64 {
        self.relay
            .channel_ttl_overrides
            .get(channel_id)
            .copied()
            .unwrap_or(self.relay.chunk_ttl_secs)
    }

    fn config_path() -> PathBuf {
        if let Ok(dir) = std::env::var("ZAJEL_SERVER_DIR") {
            return PathBuf::from(dir).join("server.toml");
        }
        PathBuf::from("zajel-server.toml")
    }
}
