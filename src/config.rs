//! Configuration for the s3stub S3 mock server

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Address to listen on
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Root directory for object storage. A temporary directory is created
    /// (and cleaned up on exit) when unset.
    #[serde(default)]
    pub root: Option<PathBuf>,

    /// Buckets created at startup so tests can talk to the mock immediately.
    #[serde(default)]
    pub initial_buckets: Vec<String>,

    /// Keep the storage root (including multipart staging) on process exit.
    /// Only meaningful for an auto-created temporary root; an explicitly
    /// configured root is never deleted.
    #[serde(default)]
    pub retain_files_on_exit: bool,
}

// Default value functions for serde
fn default_listen_addr() -> SocketAddr {
    "127.0.0.1:9090".parse().unwrap()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            root: None,
            initial_buckets: Vec::new(),
            retain_files_on_exit: false,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Ok(config)
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("S3STUB_LISTEN_ADDR") {
            if let Ok(parsed) = addr.parse() {
                config.listen_addr = parsed;
            }
        }

        if let Ok(root) = std::env::var("S3STUB_ROOT") {
            config.root = Some(PathBuf::from(root));
        }

        if let Ok(buckets) = std::env::var("S3STUB_INITIAL_BUCKETS") {
            config.initial_buckets = buckets
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }

        if let Ok(retain) = std::env::var("S3STUB_RETAIN_FILES_ON_EXIT") {
            config.retain_files_on_exit = retain == "true" || retain == "1";
        }

        config
    }

    /// Load configuration from file if it exists, otherwise from environment
    pub fn load() -> Self {
        if let Ok(path) = std::env::var("S3STUB_CONFIG") {
            if let Ok(config) = Self::from_file(&path) {
                return config;
            }
        }

        for path in &["s3stub.toml", "/etc/s3stub/config.toml"] {
            if std::path::Path::new(path).exists() {
                if let Ok(config) = Self::from_file(path) {
                    return config;
                }
            }
        }

        Self::from_env()
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),
}
