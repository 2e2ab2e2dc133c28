//! kvass Configuration
//!
//! Process-level settings loaded from a TOML file. The replication
//! identity of a node (key, pid, remote) is not part of this file; it
//! lives in the node database, see [`crate::store::NodeState`].

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main kvass configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KvassConfig {
    /// Node-local storage configuration
    #[serde(default)]
    pub node: NodeConfig,

    /// Replication server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Replication client configuration
    #[serde(default)]
    pub sync: SyncConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Node-local storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Path of the SQLite database holding entries and node state
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

/// Replication server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the sync endpoints bind to
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

/// Replication client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Per-request timeout when talking to the peer
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Only exchange entries newer than the stored watermarks
    #[serde(default = "default_true")]
    pub incremental: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn default_db_path() -> PathBuf {
    home_dir().join(".kvassdb.sqlite")
}

fn default_bind_address() -> String {
    "127.0.0.1:8000".to_string()
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            incremental: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl SyncConfig {
    /// Get the per-request timeout as Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl KvassConfig {
    /// Default location of the configuration file
    pub fn default_path() -> PathBuf {
        home_dir().join(".config").join("kvass").join("kvass.toml")
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML file, falling back to defaults when
    /// the file does not exist
    pub fn load_or_default(path: &Path) -> crate::Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            tracing::debug!("No configuration at {:?}, using defaults", path);
            Ok(Self::default())
        }
    }

    /// Load configuration from a TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: KvassConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.server.bind_address.trim().is_empty() {
            return Err(crate::Error::Config(
                "server.bind_address cannot be empty".into(),
            ));
        }

        if self.sync.timeout_ms == 0 {
            return Err(crate::Error::Config(
                "sync.timeout_ms must be greater than zero".into(),
            ));
        }

        if self.node.db_path.as_os_str().is_empty() {
            return Err(crate::Error::Config("node.db_path cannot be empty".into()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let toml = r#"
[node]
db_path = "/tmp/kvass-test.sqlite"

[server]
bind_address = "0.0.0.0:4242"

[sync]
timeout_ms = 1500
incremental = false
"#;

        let config = KvassConfig::from_str(toml).unwrap();
        assert_eq!(config.node.db_path, PathBuf::from("/tmp/kvass-test.sqlite"));
        assert_eq!(config.server.bind_address, "0.0.0.0:4242");
        assert_eq!(config.sync.timeout(), Duration::from_millis(1500));
        assert!(!config.sync.incremental);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = KvassConfig::from_str("").unwrap();
        assert_eq!(config.server.bind_address, "127.0.0.1:8000");
        assert_eq!(config.sync.timeout_ms, 5000);
        assert!(config.sync.incremental);
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let err = KvassConfig::from_str("[sync]\ntimeout_ms = 0\n").unwrap_err();
        assert!(matches!(err, crate::Error::Config(_)));
    }

    #[test]
    fn test_missing_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let config = KvassConfig::load_or_default(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.server.bind_address, "127.0.0.1:8000");
    }
}
