//! Daemon configuration file management.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Complete daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Network settings.
    #[serde(default)]
    pub network: NetworkConfig,
    /// Storage settings.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Identity settings.
    #[serde(default)]
    pub identity: IdentityConfig,
    /// Advanced settings.
    #[serde(default)]
    pub advanced: AdvancedConfig,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Bootstrap server base URL.
    #[serde(default = "default_bootstrap_url")]
    pub bootstrap_url: String,
    /// Pinned bootstrap Ed25519 public key, hex. Compiled-in default;
    /// overridable for self-hosted deployments.
    #[serde(default)]
    pub bootstrap_public_key_hex: String,
    /// Relay capacity this device offers.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Participate as a relay for others.
    #[serde(default = "default_true")]
    pub relay_enabled: bool,
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Data directory. Empty = platform default.
    #[serde(default)]
    pub data_dir: String,
}

/// Identity configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Display username.
    #[serde(default)]
    pub username: String,
}

/// Advanced configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvancedConfig {
    /// Log level: "debug" | "info" | "warn" | "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_bootstrap_url() -> String {
    "https://bootstrap.zajel.app".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bootstrap_url: default_bootstrap_url(),
            bootstrap_public_key_hex: String::new(),
            max_connections: default_max_connections(),
            relay_enabled: true,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: String::new(),
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            username: String::new(),
        }
    }
}

impl Default for AdvancedConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration, falling back to defaults when no file exists.
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_path();
        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            Ok(toml::from_str(&content)?)
        } else {
            Ok(Self::default())
        }
    }

    /// Resolve the data directory.
    pub fn data_dir(&self) -> PathBuf {
        if self.storage.data_dir.is_empty() {
            Self::default_data_dir()
        } else {
            PathBuf::from(&self.storage.data_dir)
        }
    }

    fn config_path() -> PathBuf {
        if let Ok(dir) = std::env::var("ZAJEL_DATA_DIR") {
            return PathBuf::from(dir).join("config.toml");
        }
        Self::default_data_dir().join("config.toml")
    }

    fn default_data_dir() -> PathBuf {
        if let Ok(dir) = std::env::var("ZAJEL_DATA_DIR") {
            return PathBuf::from(dir);
        }
        std::env::var("HOME")
            .map(|h| PathBuf::from(h).join(".zajel"))
            .unwrap_or_else(|_| PathBuf::from("/tmp/zajel"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DaemonConfig::default();
        assert_eq!(config.network.max_connections, 10);
        assert!(config.network.relay_enabled);
        assert_eq!(config.advanced.log_level, "info");
    }

    #[test]
    fn test_serialization_roundtrip() {
        let config = DaemonConfig::default();
        let text = toml::to_string(&config).expect("serialize");
        let _parsed: DaemonConfig = toml::from_str(&text).expect("parse");
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let parsed: DaemonConfig =
            toml::from_str("[identity]\nusername = \"alice\"\n").expect("parse");
        assert_eq!(parsed.identity.username, "alice");
        assert_eq!(parsed.network.max_connections, 10);
    }
}
