//! Content-addressed image storage for SIS.
//!
//! Objects are stored under the MD5 digest of their bytes, so identical
//! uploads deduplicate and rewrites are harmless. Resized variants are derived
//! on demand and only ever held in memory.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use sis_store::{ContentStore, StoreConfig};
//!
//! # async fn example() -> sis_store::Result<()> {
//! let config = StoreConfig::local("/srv/sis/image").with_cache_capacity(64 * 1024 * 1024);
//! let store = ContentStore::from_config(&config)?;
//!
//! let key = store.write(b"...jpeg bytes...", "photo.jpg").await?;
//! let original = store.read(&key, "photo.jpg", None).await?;
//! let thumb = store.read(&key, "photo.jpg", Some((200, 100))).await?;
//! # let _ = (original, thumb);
//! # Ok(())
//! # }
//! ```
//!
//! # Pieces
//!
//! - [`Backend`]: where originals live ([`LocalBackend`] or [`RemoteBackend`])
//! - [`Scaler`]: decode, resample, re-encode in the same format
//! - [`BoundedCache`]: byte-budgeted FIFO cache of originals and variants
//! - [`ContentStore`]: the facade tying them together
//!
//! # Configuration
//!
//! Environment variables:
//! - `SIS_IMAGE_PATH`: Root directory for the local backend (default: `./image`)
//! - `SIS_REMOTE_URL`: Peer base URL; selects the remote backend
//! - `SIS_CACHE_MB`: Cache capacity in MiB (default: 0, disabled)

pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod key;
pub mod scale;
pub mod store;

// Re-exports for convenience
pub use backend::{Backend, LocalBackend, RemoteBackend, StoredObject};
pub use cache::BoundedCache;
pub use config::{BackendConfig, ConfigError, Limits, StoreConfig};
pub use error::{CacheError, Result, StoreError};
pub use key::{ContentKey, KeyError, VariantKey};
pub use scale::{FilterKernel, ResampleKernel, Scaler};
pub use store::ContentStore;
