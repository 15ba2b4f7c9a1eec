//! Client limits and persisted defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, UpdateError};
use crate::paths;

/// Largest accepted `Content-Length`: 100 MiB, inclusive.
pub const DEFAULT_MAX_CONTENT_LENGTH: u64 = 100 * 1024 * 1024;

/// Transport and staging limits for the update client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdaterConfig {
    /// TLS port used when a URL carries no explicit port (default: 443)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Largest response body accepted (default: 100 MiB)
    #[serde(default = "default_max_content_length")]
    pub max_content_length: u64,

    /// Capacity of the request, URL and response-head staging buffers
    #[serde(default = "default_staging_buffer_size")]
    pub staging_buffer_size: usize,

    /// Capacity of a formatted header block
    #[serde(default = "default_header_buffer_size")]
    pub header_buffer_size: usize,

    /// Extra PEM bundle trusted alongside the system roots
    #[serde(default)]
    pub ca_file: Option<PathBuf>,

    /// Socket read/write/connect timeout. Unset means block indefinitely.
    #[serde(default)]
    pub io_timeout_secs: Option<u64>,
}

fn default_port() -> u16 {
    443
}

fn default_max_content_length() -> u64 {
    DEFAULT_MAX_CONTENT_LENGTH
}

fn default_staging_buffer_size() -> usize {
    4096
}

fn default_header_buffer_size() -> usize {
    256
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            max_content_length: default_max_content_length(),
            staging_buffer_size: default_staging_buffer_size(),
            header_buffer_size: default_header_buffer_size(),
            ca_file: None,
            io_timeout_secs: None,
        }
    }
}

impl UpdaterConfig {
    pub fn io_timeout(&self) -> Option<Duration> {
        self.io_timeout_secs.map(Duration::from_secs)
    }
}

/// Default request values that the command line may leave out.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestDefaults {
    pub host: Option<String>,
    pub product: Option<String>,
    pub token: Option<String>,
    pub device: Option<String>,
    pub file: Option<PathBuf>,
    pub cmd: Option<PathBuf>,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

/// Contents of `config.toml`.
///
/// ```toml
/// [client]
/// io_timeout_secs = 30
///
/// [defaults]
/// host = "https://api.example.com"
/// device = "D1"
///
/// [defaults.properties]
/// region = "eu"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtaConfig {
    #[serde(default)]
    pub client: UpdaterConfig,
    #[serde(default)]
    pub defaults: RequestDefaults,
}

impl OtaConfig {
    /// Load configuration from the default config file path.
    /// Returns default config if the file does not exist.
    pub fn load() -> Result<Self> {
        let path = paths::config_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from an explicit file, which must exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            UpdateError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        let config: OtaConfig = toml::from_str(&content)?;
        Ok(config)
    }
}
