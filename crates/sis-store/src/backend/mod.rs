//! Backends: where original bytes physically live.
//!
//! Two implementations share the [`Backend`] trait:
//! - [`LocalBackend`] writes into a per-character directory tree on disk
//! - [`RemoteBackend`] relays to another SIS instance over HTTP
//!
//! The choice is made once from [`BackendConfig`] and never changes.

mod local;
mod remote;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::config::BackendConfig;
use crate::error::Result;
use crate::key::ContentKey;

pub use local::{LocalBackend, SOURCE_DIR};
pub use remote::{
    decode_filename_header, encode_filename_header, RemoteBackend, FILENAME_HEADER, FULL_DOWN_PATH,
    SIMPLE_DOWN_PATH, UPLOAD_PATH,
};

/// An original object as held by a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub key: ContentKey,
    /// The filename the object was found under. When a read asked for "any
    /// file under this key" this is the name that was picked.
    pub filename: String,
    pub data: Bytes,
}

/// Trait for original-object storage.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Persist `data` under `key`/`filename`.
    ///
    /// Creates whatever namespace is needed. Writing the same bytes twice
    /// succeeds both times.
    async fn write(&self, data: &[u8], key: &ContentKey, filename: &str) -> Result<()>;

    /// Fetch an object.
    ///
    /// An empty `filename` selects the first object stored under `key`, in
    /// the backend's listing order, and reports its name back.
    async fn read(&self, key: &ContentKey, filename: &str) -> Result<StoredObject>;

    /// Short name for logs and health output.
    fn kind(&self) -> &'static str;
}

/// Build the backend selected by `config`.
pub fn from_config(config: &BackendConfig, remote_timeout: Duration) -> Result<Arc<dyn Backend>> {
    let backend: Arc<dyn Backend> = match config {
        BackendConfig::Local { root } => Arc::new(LocalBackend::new(root.clone())?),
        BackendConfig::Remote { base_url } => {
            Arc::new(RemoteBackend::new(base_url.clone(), remote_timeout)?)
        }
    };
    tracing::info!(kind = backend.kind(), "backend ready");
    Ok(backend)
}
