//! NotifyBridge configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::collector::DEFAULT_CAPACITY;
use crate::ipc::{DEFAULT_HOST, DEFAULT_MAX_LINE_BYTES, DEFAULT_PORT};

/// Main NotifyBridge configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// IPC server settings
    pub server: ServerConfig,

    /// Record cache settings
    pub cache: CacheConfig,

    /// Event source settings
    pub source: SourceConfig,

    /// Logging settings
    pub log: LogConfig,
}

impl Config {
    /// Validate configuration before use
    ///
    /// Call this early in startup to fail fast with clear error messages.
    pub fn validate(&self) -> Result<()> {
        if self.cache.capacity == 0 {
            return Err(eyre::eyre!("cache.capacity must be at least 1"));
        }
        if self.server.max_line_bytes == 0 {
            return Err(eyre::eyre!("server.max-line-bytes must be at least 1"));
        }
        if self.server.host.trim().is_empty() {
            return Err(eyre::eyre!("server.host must not be empty"));
        }
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // An explicit path must load
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .notifybridge.yml
        let local_config = PathBuf::from(".notifybridge.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/notifybridge/notifybridge.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("notifybridge").join("notifybridge.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Apply command-line overrides for the listen address
    pub fn with_overrides(mut self, host: Option<String>, port: Option<u16>) -> Self {
        if let Some(host) = host {
            self.server.host = host;
        }
        if let Some(port) = port {
            self.server.port = port;
        }
        self
    }
}

/// IPC server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface to bind (loopback by default)
    pub host: String,

    pub port: u16,

    /// Longest accepted request line, excluding the newline
    #[serde(rename = "max-line-bytes")]
    pub max_line_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }
}

impl ServerConfig {
    /// `host:port` string for binding and connecting
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Record cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of records kept, newest first
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
        }
    }
}

/// Event source settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// JSONL spool file the bridge watches
    pub spool: PathBuf,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            spool: default_spool_path(),
        }
    }
}

/// Default spool location under the platform's local data directory
pub fn default_spool_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("notifybridge")
        .join("notifications.jsonl")
}

/// Logging settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error); CLI flag wins
    pub level: Option<String>,

    /// Write logs to this file instead of stderr
    pub file: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8765);
        assert_eq!(config.server.max_line_bytes, 1024 * 1024);
        assert_eq!(config.cache.capacity, 200);
        assert!(config.source.spool.ends_with("notifybridge/notifications.jsonl"));
        assert!(config.log.level.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deserialize_config() {
        let yaml = r#"
server:
  host: 0.0.0.0
  port: 9000
  max-line-bytes: 4096

cache:
  capacity: 50

source:
  spool: /var/spool/toasts.jsonl

log:
  level: debug
  file: /tmp/nb.log
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.server.addr(), "0.0.0.0:9000");
        assert_eq!(config.server.max_line_bytes, 4096);
        assert_eq!(config.cache.capacity, 50);
        assert_eq!(config.source.spool, PathBuf::from("/var/spool/toasts.jsonl"));
        assert_eq!(config.log.level.as_deref(), Some("debug"));
        assert_eq!(config.log.file, Some(PathBuf::from("/tmp/nb.log")));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let yaml = r#"
server:
  port: 9999
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.server.port, 9999);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.cache.capacity, 200);
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let mut config = Config::default();
        config.cache.capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_line_limit() {
        let mut config = Config::default();
        config.server.max_line_bytes = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_overrides_replace_address() {
        let config = Config::default().with_overrides(Some("localhost".to_string()), Some(1234));
        assert_eq!(config.server.addr(), "localhost:1234");

        let untouched = Config::default().with_overrides(None, None);
        assert_eq!(untouched.server.addr(), "127.0.0.1:8765");
    }

    #[test]
    fn test_load_explicit_path() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("bridge.yml");
        std::fs::write(&path, "cache:\n  capacity: 7\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.cache.capacity, 7);
    }

    #[test]
    fn test_load_missing_explicit_path_fails() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("missing.yml");
        assert!(Config::load(Some(&path)).is_err());
    }

    #[test]
    fn test_load_invalid_yaml_fails() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("broken.yml");
        std::fs::write(&path, "server: [not, a, map]\n").unwrap();
        assert!(Config::load(Some(&path)).is_err());
    }
}
