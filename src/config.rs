//! Configuration for the client.
//!
//! Settings come from an optional TOML file; the command-line front end
//! layers its own flags on top. Every field has a default so an empty file
//! (or no file) is valid.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::resp::parser::DEFAULT_MAX_BULK_LEN;

/// Read buffer size
const DEFAULT_READ_BUFFER_SIZE: usize = 16 * 1024;

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub client: ClientSection,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where and how to connect
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Server address (host:port)
    #[serde(default = "default_address")]
    pub address: String,
    /// Connect timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Disable Nagle's algorithm
    #[serde(default = "default_nodelay")]
    pub nodelay: bool,
    /// TCP keepalive idle time in seconds (0 = off)
    #[serde(default)]
    pub keepalive_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            connect_timeout_ms: default_connect_timeout_ms(),
            nodelay: default_nodelay(),
            keepalive_secs: 0,
        }
    }
}

/// Request handling
#[derive(Debug, Deserialize)]
pub struct ClientSection {
    /// Local deadline applied to every request in milliseconds (0 = none)
    #[serde(default)]
    pub local_deadline_ms: u64,
    /// Initial size of the reply buffer
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
    /// Largest bulk string accepted from the server
    #[serde(default = "default_max_bulk_len")]
    pub max_bulk_len: usize,
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            local_deadline_ms: 0,
            read_buffer_size: default_read_buffer_size(),
            max_bulk_len: default_max_bulk_len(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_address() -> String {
    "127.0.0.1:6379".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_nodelay() -> bool {
    true
}

fn default_read_buffer_size() -> usize {
    DEFAULT_READ_BUFFER_SIZE
}

fn default_max_bulk_len() -> usize {
    DEFAULT_MAX_BULK_LEN
}

fn default_log_level() -> String {
    "info".to_string()
}

impl TomlConfig {
    /// Read and parse a TOML configuration file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileRead(path.to_path_buf(), e))?;
        toml::from_str(&contents).map_err(|e| ConfigError::TomlParse(path.to_path_buf(), e))
    }

    /// Resolve the connection settings.
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            address: self.server.address.clone(),
            connect_timeout: Duration::from_millis(self.server.connect_timeout_ms),
            nodelay: self.server.nodelay,
            keepalive: non_zero_secs(self.server.keepalive_secs),
            local_deadline: non_zero_millis(self.client.local_deadline_ms),
            read_buffer_size: self.client.read_buffer_size,
            max_bulk_len: self.client.max_bulk_len,
        }
    }
}

fn non_zero_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

fn non_zero_millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

/// Final resolved connection settings
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub address: String,
    pub connect_timeout: Duration,
    pub nodelay: bool,
    pub keepalive: Option<Duration>,
    /// Default local deadline for every request issued through a `Client`
    pub local_deadline: Option<Duration>,
    pub read_buffer_size: usize,
    pub max_bulk_len: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        TomlConfig::default().client_config()
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::FileRead(_, e) => Some(e),
            ConfigError::TomlParse(_, e) => Some(e),
        }
    }
}
