//! Server and store configuration
//!
//! Every field has a default, so an empty JSON object is a valid config file.

use crate::error::{Result, UdsVaultError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Socket path used when none is configured
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/uds-demo.sock";

/// Bounds applied by the in-memory store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Maximum number of distinct keys
    pub capacity: usize,
    /// Keys are truncated to this many bytes
    pub max_key_len: usize,
    /// Values are truncated to this many bytes
    pub max_value_len: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            max_key_len: 99,
            max_value_len: 199,
        }
    }
}

/// UdsVault server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub socket_path: PathBuf,
    /// Longest request line read in one piece, terminator included
    pub max_line_len: usize,
    /// How long in-flight connections may keep running after shutdown
    pub shutdown_grace_ms: u64,
    pub store: StoreConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            max_line_len: 1024,
            shutdown_grace_ms: 5000,
            store: StoreConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|e| {
            UdsVaultError::Config(format!("failed to read '{}': {}", path.display(), e))
        })?;
        let config: ServerConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.socket_path.as_os_str().is_empty() {
            return Err(UdsVaultError::Config("socket_path must not be empty".to_string()));
        }
        if self.max_line_len == 0 {
            return Err(UdsVaultError::Config("max_line_len must be positive".to_string()));
        }
        Ok(())
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_match_reference_service() {
        let config = ServerConfig::default();
        assert_eq!(config.socket_path, PathBuf::from("/tmp/uds-demo.sock"));
        assert_eq!(config.max_line_len, 1024);
        assert_eq!(config.store.capacity, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"socket_path": "/tmp/other.sock", "store": {{"capacity": 3}}}}"#).unwrap();

        let config = ServerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.socket_path, PathBuf::from("/tmp/other.sock"));
        assert_eq!(config.store.capacity, 3);
        assert_eq!(config.store.max_key_len, 99);
        assert_eq!(config.shutdown_grace_ms, 5000);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"max_line_len": 0}}"#).unwrap();
        assert!(matches!(
            ServerConfig::from_file(file.path()),
            Err(UdsVaultError::Config(_))
        ));

        let mut file = NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(
            ServerConfig::from_file(file.path()),
            Err(UdsVaultError::Serialization(_))
        ));
    }
}
