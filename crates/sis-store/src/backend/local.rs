//! LocalBackend: originals on the local filesystem.
//!
//! Layout, one directory level per hex character of the key:
//! ```text
//! {root}/
//! └── 6/
//!     └── 8/
//!         └── 5/ ... 2/          # 32 levels in total
//!             ├── .<uuid>.tmp    # in-flight write
//!             └── src/
//!                 └── test1.jpg  # the original
//! ```
//!
//! Each level fans out to at most 16 entries, so no directory grows large no
//! matter how many objects are stored; the price is a path depth of 32.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use uuid::Uuid;

use super::{Backend, StoredObject};
use crate::error::{Result, StoreError};
use crate::key::{is_safe_filename, ContentKey};

/// Directory under each key directory that holds raw originals.
pub const SOURCE_DIR: &str = "src";

/// Filesystem-backed object storage.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    /// Create a backend rooted at `root`, creating the directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| {
            StoreError::io(format!("failed to create root {}", root.display()), e)
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory for a key: one level per character.
    pub fn key_dir(&self, key: &ContentKey) -> PathBuf {
        let mut path = self.root.clone();
        for c in key.shards() {
            path.push(c.to_string());
        }
        path
    }

    /// Directory holding the originals for a key.
    pub fn source_dir(&self, key: &ContentKey) -> PathBuf {
        self.key_dir(key).join(SOURCE_DIR)
    }

    /// Smallest regular-file name in `dir`, or `None` if there is none.
    async fn first_file(dir: &Path) -> Result<Option<String>> {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(format!("failed to list {}", dir.display()), e)),
        };

        let mut first: Option<String> = None;
        loop {
            let entry = entries
                .next_entry()
                .await
                .map_err(|e| StoreError::io(format!("failed to list {}", dir.display()), e))?;
            let Some(entry) = entry else {
                break;
            };

            let is_file = entry
                .file_type()
                .await
                .map(|t| t.is_file())
                .unwrap_or(false);
            if !is_file {
                continue;
            }

            if let Ok(name) = entry.file_name().into_string() {
                if first.as_ref().map_or(true, |current| name < *current) {
                    first = Some(name);
                }
            }
        }

        Ok(first)
    }
}

#[async_trait]
impl Backend for LocalBackend {
    #[tracing::instrument(skip(self, data), fields(size = data.len()))]
    async fn write(&self, data: &[u8], key: &ContentKey, filename: &str) -> Result<()> {
        if !is_safe_filename(filename, usize::MAX) {
            return Err(StoreError::InvalidFilename(filename.to_string()));
        }

        let source_dir = self.source_dir(key);
        tokio::fs::create_dir_all(&source_dir).await.map_err(|e| {
            StoreError::io(format!("failed to create {}", source_dir.display()), e)
        })?;

        // Stage next to src/ so listings never see a partial file, then
        // rename over the destination.
        let temp_path = self.key_dir(key).join(format!(".{}.tmp", Uuid::new_v4()));
        tokio::fs::write(&temp_path, data).await.map_err(|e| {
            StoreError::io(format!("failed to write {}", temp_path.display()), e)
        })?;

        let path = source_dir.join(filename);
        if let Err(e) = tokio::fs::rename(&temp_path, &path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(StoreError::io(
                format!("failed to rename {} to {}", temp_path.display(), path.display()),
                e,
            ));
        }

        tracing::debug!(path = %path.display(), "stored original");
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn read(&self, key: &ContentKey, filename: &str) -> Result<StoredObject> {
        let source_dir = self.source_dir(key);

        let filename = if filename.is_empty() {
            Self::first_file(&source_dir)
                .await?
                .ok_or_else(|| StoreError::not_found(key.as_str(), ""))?
        } else if is_safe_filename(filename, usize::MAX) {
            filename.to_string()
        } else {
            return Err(StoreError::InvalidFilename(filename.to_string()));
        };

        let path = source_dir.join(&filename);
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::not_found(key.as_str(), &filename));
            }
            Err(e) => {
                return Err(StoreError::io(format!("failed to read {}", path.display()), e));
            }
        };

        Ok(StoredObject {
            key: key.clone(),
            filename,
            data: Bytes::from(data),
        })
    }

    fn kind(&self) -> &'static str {
        "local"
    }
}
