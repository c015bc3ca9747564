//! Store configuration with environment variable and file-based loading.
//!
//! Environment variables:
//! - `SIS_IMAGE_PATH`: Root directory for the local backend
//! - `SIS_REMOTE_URL`: Base URL of a peer; selects the remote backend when set
//! - `SIS_CACHE_MB`: Cache capacity in MiB (0 disables the cache)
//!
//! Default: local backend rooted at `./image`, cache disabled.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid value for {var}: {value:?}")]
    Env { var: &'static str, value: String },
}

/// Where original bytes live. Chosen once at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackendConfig {
    /// Nested per-character directories under `root`.
    Local { root: PathBuf },
    /// Another SIS instance reached over HTTP.
    Remote { base_url: String },
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::Local {
            root: PathBuf::from("image"),
        }
    }
}

/// Bounds enforced before anything reaches a backend or the scaler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Maximum filename length in bytes.
    pub max_filename_len: usize,
    /// Smallest accepted width or height.
    pub min_dimension: u32,
    /// Largest accepted width or height.
    pub max_dimension: u32,
    /// Largest accepted width × height of a resized variant.
    pub max_pixels: u64,
    /// Largest accepted upload body, enforced by the HTTP layer.
    pub max_upload_bytes: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_filename_len: 50,
            min_dimension: 5,
            max_dimension: 1024 * 1024,
            max_pixels: 64 * 1024 * 1024,
            max_upload_bytes: 50 * 1024 * 1024,
        }
    }
}

/// Configuration for a [`ContentStore`](crate::ContentStore).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: BackendConfig,

    /// Cache budget in bytes. Zero disables caching.
    #[serde(default)]
    pub cache_capacity_bytes: u64,

    /// Request timeout for the remote backend.
    #[serde(default = "default_remote_timeout")]
    pub remote_timeout_secs: u64,

    #[serde(default)]
    pub limits: Limits,
}

fn default_remote_timeout() -> u64 {
    30
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            cache_capacity_bytes: 0,
            remote_timeout_secs: default_remote_timeout(),
            limits: Limits::default(),
        }
    }
}

impl StoreConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = env::var("SIS_IMAGE_PATH") {
            config.backend = BackendConfig::Local {
                root: PathBuf::from(path),
            };
        }

        if let Ok(url) = env::var("SIS_REMOTE_URL") {
            if !url.is_empty() {
                config.backend = BackendConfig::Remote { base_url: url };
            }
        }

        if let Ok(mb) = env::var("SIS_CACHE_MB") {
            let mb: u64 = mb.trim().parse().map_err(|_| ConfigError::Env {
                var: "SIS_CACHE_MB",
                value: mb.clone(),
            })?;
            config.cache_capacity_bytes = mb_to_bytes(mb);
        }

        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to environment.
    ///
    /// The file should contain a `[store]` section:
    /// ```toml
    /// [store]
    /// cache_capacity_bytes = 104857600
    ///
    /// [store.backend]
    /// kind = "local"
    /// root = "/srv/sis/image"
    /// ```
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;

        let table: toml::Table = contents.parse().map_err(|e: toml::de::Error| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        match table.get("store") {
            Some(section) => section
                .clone()
                .try_into()
                .map_err(|e: toml::de::Error| ConfigError::Parse {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                }),
            None => Self::from_env(),
        }
    }

    /// A local-backend config rooted at `root`.
    pub fn local(root: impl Into<PathBuf>) -> Self {
        Self {
            backend: BackendConfig::Local { root: root.into() },
            ..Self::default()
        }
    }

    /// A remote-backend config pointed at a peer.
    pub fn remote(base_url: impl Into<String>) -> Self {
        Self {
            backend: BackendConfig::Remote {
                base_url: base_url.into(),
            },
            ..Self::default()
        }
    }

    pub fn with_cache_capacity(mut self, bytes: u64) -> Self {
        self.cache_capacity_bytes = bytes;
        self
    }
}

/// Convert a MiB count from the CLI or environment into bytes.
pub fn mb_to_bytes(mb: u64) -> u64 {
    mb.saturating_mul(1024 * 1024)
}
