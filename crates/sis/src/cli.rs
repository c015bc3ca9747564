//! Command-line arguments for the `sis` server.

use std::path::PathBuf;

use clap::Parser;
use sis_store::config::mb_to_bytes;
use sis_store::{BackendConfig, ConfigError, StoreConfig};

/// Simple Image Server: content-addressed image storage with on-the-fly resizing
#[derive(Parser, Debug)]
#[command(name = "sis", version, about, long_about = None)]
pub struct Cli {
    /// Port to listen on
    #[arg(short, long, default_value = "3333")]
    pub port: u16,

    /// Store originals under this directory (local backend)
    #[arg(long)]
    pub image: Option<PathBuf>,

    /// Forward originals to a peer SIS instance (remote backend)
    #[arg(long, conflicts_with = "image")]
    pub remote: Option<String>,

    /// Cache capacity in MiB; 0 disables the cache
    #[arg(long)]
    pub cache_mb: Option<u64>,

    /// TOML config file with a [store] section
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

impl Cli {
    /// Resolve the store configuration: file or environment first, then flags.
    pub fn store_config(&self) -> Result<StoreConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => StoreConfig::from_file(path)?,
            None => StoreConfig::from_env()?,
        };

        if let Some(root) = &self.image {
            config.backend = BackendConfig::Local { root: root.clone() };
        }
        if let Some(url) = &self.remote {
            config.backend = BackendConfig::Remote {
                base_url: url.clone(),
            };
        }
        if let Some(mb) = self.cache_mb {
            config.cache_capacity_bytes = mb_to_bytes(mb);
        }

        Ok(config)
    }
}
