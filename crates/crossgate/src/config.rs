//! Gateway configuration.
//!
//! Loaded from TOML. Every field has a default, so an empty file is a valid
//! (in-memory, default-phase) configuration.
//!
//! ```toml
//! name = "gateway-a"
//! base_path = "http://gateway-a:3010"
//! phases = ["init", "exec", "done", "ack"]
//! allowed_backup_gateways = []
//! recover_remote_on_start = true
//!
//! [storage]
//! database_path = "/var/lib/crossgate/log.db"
//! content_path = "/var/lib/crossgate/content"
//!
//! [logging]
//! level = "info"
//! json = false
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crossgate_core::{Ed25519PublicKey, PhaseOrder};

use crate::error::{GatewayError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Label used in logs.
    pub name: String,
    /// This gateway's own address, advertised when it acts as a backup.
    pub base_path: String,
    /// Ordered phase vocabulary. The last phase is terminal.
    pub phases: Vec<String>,
    /// Hex ed25519 keys allowed to take over the source role of a session.
    pub allowed_backup_gateways: Vec<String>,
    /// Whether bootstrap also runs a remote Recover round per open session.
    pub recover_remote_on_start: bool,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite file. `None` keeps the log in memory.
    pub database_path: Option<PathBuf>,
    /// Content-addressed directory. Required by `Gateway::open`.
    pub content_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`.
    pub level: String,
    pub json: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            name: "gateway".to_string(),
            base_path: String::new(),
            phases: PhaseOrder::DEFAULT.iter().map(|p| p.to_string()).collect(),
            allowed_backup_gateways: Vec::new(),
            recover_remote_on_start: false,
            storage: StorageConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl GatewayConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| GatewayError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| GatewayError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        self.phase_order()?;
        self.backup_keys()?;
        Ok(())
    }

    pub fn phase_order(&self) -> Result<PhaseOrder> {
        PhaseOrder::new(self.phases.iter().cloned())
            .map_err(|e| GatewayError::Config(e.to_string()))
    }

    /// Parsed allow list of backup gateway keys.
    pub fn backup_keys(&self) -> Result<Vec<Ed25519PublicKey>> {
        self.allowed_backup_gateways
            .iter()
            .map(|hex_key| {
                let key = Ed25519PublicKey::from_hex(hex_key).map_err(|e| {
                    GatewayError::Config(format!("backup gateway key `{}`: {}", hex_key, e))
                })?;
                if !key.is_valid() {
                    return Err(GatewayError::Config(format!(
                        "backup gateway key `{}` is not a valid ed25519 key",
                        hex_key
                    )));
                }
                Ok(key)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossgate_core::Keypair;

    #[test]
    fn test_empty_file_is_default() {
        let config = GatewayConfig::from_toml_str("").unwrap();
        assert_eq!(config, GatewayConfig::default());
        assert_eq!(config.phase_order().unwrap().terminal(), "ack");
    }

    #[test]
    fn test_full_file() {
        let backup = Keypair::from_seed(&[4; 32]).public_key();
        let content = format!(
            r#"
            name = "gateway-a"
            base_path = "http://a"
            phases = ["lock", "commit", "close"]
            allowed_backup_gateways = ["{}"]
            recover_remote_on_start = true

            [storage]
            database_path = "/tmp/log.db"

            [logging]
            level = "debug"
            json = true
            "#,
            backup.to_hex()
        );

        let config = GatewayConfig::from_toml_str(&content).unwrap();
        assert_eq!(config.name, "gateway-a");
        assert_eq!(config.phase_order().unwrap().terminal(), "close");
        assert_eq!(config.backup_keys().unwrap(), vec![backup]);
        assert_eq!(config.storage.database_path, Some(PathBuf::from("/tmp/log.db")));
        assert_eq!(config.storage.content_path, None);
        assert!(config.logging.json);
    }

    #[test]
    fn test_duplicate_phase_rejected() {
        let err = GatewayConfig::from_toml_str(r#"phases = ["init", "init"]"#).unwrap_err();
        assert!(matches!(err, GatewayError::Config(_)));
    }

    #[test]
    fn test_bad_backup_key_rejected() {
        let err = GatewayConfig::from_toml_str(r#"allowed_backup_gateways = ["zz"]"#).unwrap_err();
        assert!(matches!(err, GatewayError::Config(_)));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.toml");
        std::fs::write(&path, "name = \"b\"\n").unwrap();
        assert_eq!(GatewayConfig::from_file(&path).unwrap().name, "b");
        assert!(GatewayConfig::from_file(dir.path().join("missing.toml")).is_err());
    }
}
