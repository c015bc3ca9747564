//! ContentStore: the facade request handlers talk to.
//!
//! Writes go straight to the backend and then, best effort, into the cache.
//! Reads try the cache first, fall back to the backend, resize when asked to,
//! and backfill the cache with whatever they computed. Cache trouble never
//! reaches the caller; backend and scaler errors always do.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::backend::{self, Backend, StoredObject};
use crate::cache::BoundedCache;
use crate::config::{Limits, StoreConfig};
use crate::error::{Result, StoreError};
use crate::key::{is_safe_filename, ContentKey, VariantKey};
use crate::scale::Scaler;

/// Content-addressed object store with a resize cache in front.
///
/// Build one at startup and share it behind an `Arc`.
pub struct ContentStore {
    backend: Arc<dyn Backend>,
    cache: BoundedCache,
    scaler: Scaler,
    limits: Limits,
}

impl std::fmt::Debug for ContentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentStore")
            .field("backend", &self.backend.kind())
            .field("cache", &self.cache)
            .field("limits", &self.limits)
            .finish()
    }
}

impl ContentStore {
    pub fn new(backend: Arc<dyn Backend>, cache: BoundedCache, scaler: Scaler, limits: Limits) -> Self {
        Self {
            backend,
            cache,
            scaler,
            limits,
        }
    }

    /// Build the backend, cache and default scaler described by `config`.
    pub fn from_config(config: &StoreConfig) -> Result<Self> {
        let backend = backend::from_config(
            &config.backend,
            Duration::from_secs(config.remote_timeout_secs),
        )?;
        Ok(Self::new(
            backend,
            BoundedCache::new(config.cache_capacity_bytes),
            Scaler::default(),
            config.limits.clone(),
        ))
    }

    pub fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    pub fn cache(&self) -> &BoundedCache {
        &self.cache
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    /// Store `data` under its content key and return the key.
    ///
    /// The filename is checked before anything touches the backend.
    #[tracing::instrument(skip(self, data), fields(size = data.len()))]
    pub async fn write(&self, data: &[u8], filename: &str) -> Result<ContentKey> {
        self.check_filename(filename)?;

        let key = ContentKey::from_data(data);
        self.backend.write(data, &key, filename).await?;

        self.remember(
            VariantKey::raw(&key, filename).to_string(),
            Bytes::copy_from_slice(data),
        );

        tracing::info!(key = %key, "stored object");
        Ok(key)
    }

    /// Fetch an object, optionally resized to `dims` = (width, height).
    ///
    /// An empty filename means "whichever object the backend lists first
    /// under this key".
    #[tracing::instrument(skip(self, key), fields(key = %key))]
    pub async fn read(
        &self,
        key: &ContentKey,
        filename: &str,
        dims: Option<(u32, u32)>,
    ) -> Result<Bytes> {
        if !filename.is_empty() {
            self.check_filename(filename)?;
        }
        if let Some((width, height)) = dims {
            self.check_dimensions(width, height)?;
        }

        let variant = match dims {
            Some((width, height)) => VariantKey::scaled(key, filename, width, height),
            None => VariantKey::raw(key, filename),
        }
        .to_string();

        if let Some(hit) = self.cache.get(&variant) {
            tracing::debug!(variant = %variant, "cache hit");
            return Ok(hit);
        }
        tracing::debug!(variant = %variant, "cache miss");

        let object = self.backend.read(key, filename).await?;

        let data = match dims {
            Some((width, height)) => self.scale(object.data, width, height).await?,
            None => object.data,
        };

        self.remember(variant, data.clone());
        Ok(data)
    }

    /// Fetch an original straight from the backend, bypassing the cache.
    ///
    /// Unlike [`read`](Self::read) this reports which filename was resolved
    /// when `filename` is empty.
    #[tracing::instrument(skip(self, key), fields(key = %key))]
    pub async fn read_original(&self, key: &ContentKey, filename: &str) -> Result<StoredObject> {
        if !filename.is_empty() {
            self.check_filename(filename)?;
        }
        self.backend.read(key, filename).await
    }

    /// Run the scaler on the blocking pool.
    async fn scale(&self, original: Bytes, width: u32, height: u32) -> Result<Bytes> {
        let scaler = self.scaler.clone();
        let scaled = tokio::task::spawn_blocking(move || scaler.scale(&original, width, height))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))??;
        Ok(Bytes::from(scaled))
    }

    fn remember(&self, variant: String, data: Bytes) {
        if let Err(e) = self.cache.put(variant, data) {
            tracing::debug!(error = %e, "not caching");
        }
    }

    fn check_filename(&self, filename: &str) -> Result<()> {
        if is_safe_filename(filename, self.limits.max_filename_len) {
            Ok(())
        } else {
            tracing::warn!(filename, "rejected filename");
            Err(StoreError::InvalidFilename(filename.to_string()))
        }
    }

    fn check_dimensions(&self, width: u32, height: u32) -> Result<()> {
        let range = self.limits.min_dimension..=self.limits.max_dimension;
        if !range.contains(&width) || !range.contains(&height) {
            return Err(StoreError::InvalidDimensions {
                width,
                height,
                min: self.limits.min_dimension,
                max: self.limits.max_dimension,
            });
        }

        // The scaler allocates width * height RGBA pixels up front.
        if u64::from(width) * u64::from(height) > self.limits.max_pixels {
            return Err(StoreError::TooManyPixels {
                width,
                height,
                max_pixels: self.limits.max_pixels,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::LocalBackend;
    use crate::scale::tests::{sample_image, CountingKernel};
    use async_trait::async_trait;
    use image::ImageFormat;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// In-memory backend that counts calls.
    #[derive(Default)]
    struct RecordingBackend {
        writes: AtomicUsize,
        reads: AtomicUsize,
        objects: Mutex<BTreeMap<(String, String), Bytes>>,
    }

    #[async_trait]
    impl Backend for RecordingBackend {
        async fn write(&self, data: &[u8], key: &ContentKey, filename: &str) -> Result<()> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.objects.lock().unwrap().insert(
                (key.to_string(), filename.to_string()),
                Bytes::copy_from_slice(data),
            );
            Ok(())
        }

        async fn read(&self, key: &ContentKey, filename: &str) -> Result<StoredObject> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            let objects = self.objects.lock().unwrap();
            let found = objects
                .iter()
                .find(|((k, f), _)| k == key.as_str() && (filename.is_empty() || f == filename));
            match found {
                Some(((_, f), data)) => Ok(StoredObject {
                    key: key.clone(),
                    filename: f.clone(),
                    data: data.clone(),
                }),
                None => Err(StoreError::not_found(key.as_str(), filename)),
            }
        }

        fn kind(&self) -> &'static str {
            "recording"
        }
    }

    fn recording_store(capacity: u64) -> (Arc<RecordingBackend>, Arc<CountingKernel>, ContentStore) {
        let backend = Arc::new(RecordingBackend::default());
        let kernel = Arc::new(CountingKernel::default());
        let store = ContentStore::new(
            backend.clone(),
            BoundedCache::new(capacity),
            Scaler::new(kernel.clone()),
            Limits::default(),
        );
        (backend, kernel, store)
    }

    fn local_store(dir: &TempDir, capacity: u64) -> ContentStore {
        ContentStore::from_config(
            &StoreConfig::local(dir.path()).with_cache_capacity(capacity),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_write_returns_digest_independent_of_name() {
        let (_, _, store) = recording_store(0);
        let a = store.write(b"hello world", "a.txt").await.unwrap();
        let b = store.write(b"hello world", "b.txt").await.unwrap();
        assert_eq!(a.as_str(), "5eb63bbbe01eeed093cb22bb8f5acdc3");
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_round_trip_through_local_backend() {
        let dir = TempDir::new().unwrap();
        let store = local_store(&dir, 0);
        let data = sample_image(ImageFormat::Jpeg, 64, 32);

        let key = store.write(&data, "test1.jpg").await.unwrap();
        assert_eq!(key, ContentKey::from_data(&data));

        let raw = store.read(&key, "test1.jpg", None).await.unwrap();
        assert_eq!(raw.as_ref(), data.as_slice());

        let scaled = store.read(&key, "test1.jpg", Some((200, 100))).await.unwrap();
        assert_eq!(image::guess_format(&scaled).unwrap(), ImageFormat::Jpeg);
        let decoded = image::load_from_memory(&scaled).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (200, 100));
    }

    #[tokio::test]
    async fn test_read_with_empty_filename_uses_first_object() {
        let dir = TempDir::new().unwrap();
        let store = local_store(&dir, 0);
        let data = sample_image(ImageFormat::Png, 16, 16);
        let key = store.write(&data, "only.png").await.unwrap();

        let raw = store.read(&key, "", None).await.unwrap();
        assert_eq!(raw.as_ref(), data.as_slice());

        let original = store.read_original(&key, "").await.unwrap();
        assert_eq!(original.filename, "only.png");
    }

    #[tokio::test]
    async fn test_repeated_resize_hits_cache() {
        let (backend, kernel, store) = recording_store(10 * 1024 * 1024);
        let data = sample_image(ImageFormat::Png, 40, 40);
        let key = store.write(&data, "pic.png").await.unwrap();

        let first = store.read(&key, "pic.png", Some((10, 20))).await.unwrap();
        let second = store.read(&key, "pic.png", Some((10, 20))).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(kernel.calls.load(Ordering::SeqCst), 1);
        assert_eq!(backend.reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_disabled_cache_rescales_every_time() {
        let (backend, kernel, store) = recording_store(0);
        let data = sample_image(ImageFormat::Gif, 24, 24);
        let key = store.write(&data, "anim.gif").await.unwrap();

        store.read(&key, "anim.gif", Some((12, 12))).await.unwrap();
        store.read(&key, "anim.gif", Some((12, 12))).await.unwrap();

        assert_eq!(kernel.calls.load(Ordering::SeqCst), 2);
        assert_eq!(backend.reads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_write_populates_cache() {
        let (backend, _, store) = recording_store(1024 * 1024);
        let key = store.write(b"cached bytes", "c.bin").await.unwrap();

        let data = store.read(&key, "c.bin", None).await.unwrap();
        assert_eq!(data.as_ref(), b"cached bytes");
        assert_eq!(backend.reads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_scaled_variant_cached_separately_from_raw() {
        let (_, _, store) = recording_store(10 * 1024 * 1024);
        let data = sample_image(ImageFormat::Png, 30, 30);
        let key = store.write(&data, "p.png").await.unwrap();

        store.read(&key, "p.png", Some((10, 10))).await.unwrap();

        let raw_key = VariantKey::raw(&key, "p.png").to_string();
        let scaled_key = VariantKey::scaled(&key, "p.png", 10, 10).to_string();
        assert_eq!(store.cache().get(&raw_key).unwrap().as_ref(), data.as_slice());
        assert_ne!(store.cache().get(&scaled_key).unwrap().as_ref(), data.as_slice());
        assert_eq!(store.cache().len(), 2);
    }

    #[tokio::test]
    async fn test_oversized_object_still_written() {
        let (backend, _, store) = recording_store(16);
        let key = store.write(&[1u8; 64], "big.bin").await.unwrap();

        assert_eq!(backend.writes.load(Ordering::SeqCst), 1);
        assert!(store.cache().is_empty());
        let data = store.read(&key, "big.bin", None).await.unwrap();
        assert_eq!(data.len(), 64);
    }

    #[tokio::test]
    async fn test_bad_filenames_never_reach_backend() {
        let (backend, _, store) = recording_store(0);
        let long = format!("{}.jpg", "x".repeat(50));

        for name in [long.as_str(), "a/b.jpg", "a\\b.jpg", "..", ""] {
            let err = store.write(b"data", name).await.unwrap_err();
            assert!(matches!(err, StoreError::InvalidFilename(_)), "{name:?}");
        }
        assert_eq!(backend.writes.load(Ordering::SeqCst), 0);

        let key = ContentKey::from_data(b"data");
        let err = store.read(&key, "a/b.jpg", None).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidFilename(_)));
        assert_eq!(backend.reads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_filename_at_limit_accepted() {
        let (_, _, store) = recording_store(0);
        let name = "12345123451234512345123451234512345123451234512345.jpg";
        assert!(store.write(b"data", name).await.is_err());
        let name = &name[..50];
        assert!(store.write(b"data", name).await.is_ok());
    }

    #[tokio::test]
    async fn test_dimensions_out_of_range_rejected() {
        let (backend, kernel, store) = recording_store(0);
        let data = sample_image(ImageFormat::Png, 16, 16);
        let key = store.write(&data, "d.png").await.unwrap();

        for dims in [(4, 100), (100, 4), (0, 0), (1024 * 1024 + 1, 10)] {
            let err = store.read(&key, "d.png", Some(dims)).await.unwrap_err();
            assert!(matches!(err, StoreError::InvalidDimensions { .. }), "{dims:?}");
        }
        assert_eq!(backend.reads.load(Ordering::SeqCst), 0);
        assert_eq!(kernel.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_dimensions_over_pixel_budget_rejected() {
        let (backend, kernel, store) = recording_store(0);
        let data = sample_image(ImageFormat::Png, 16, 16);
        let key = store.write(&data, "p.png").await.unwrap();

        let max = store.limits().max_dimension;
        for dims in [(max, max), (max, 1024), (16_384, 16_384)] {
            let err = store.read(&key, "p.png", Some(dims)).await.unwrap_err();
            assert!(matches!(err, StoreError::TooManyPixels { .. }), "{dims:?}");
        }
        assert_eq!(backend.reads.load(Ordering::SeqCst), 0);
        assert_eq!(kernel.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_not_found_propagates() {
        let (_, _, store) = recording_store(1024);
        let key = ContentKey::from_data(b"missing");
        let err = store.read(&key, "m.jpg", None).await.unwrap_err();
        assert!(err.is_not_found());
        let err = store.read(&key, "m.jpg", Some((10, 10))).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_scaler_errors_propagate_and_are_not_cached() {
        let (_, _, store) = recording_store(1024 * 1024);
        let key = store.write(b"plain text, not an image", "note.jpg").await.unwrap();

        let err = store.read(&key, "note.jpg", Some((10, 10))).await.unwrap_err();
        assert!(matches!(err, StoreError::Decode(_)));
        let scaled_key = VariantKey::scaled(&key, "note.jpg", 10, 10).to_string();
        assert!(store.cache().get(&scaled_key).is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_identical_writes() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(local_store(&dir, 1024 * 1024));
        let data = sample_image(ImageFormat::Png, 20, 20);

        let mut handles = vec![];
        for _ in 0..8 {
            let store = Arc::clone(&store);
            let data = data.clone();
            handles.push(tokio::spawn(async move { store.write(&data, "dup.png").await }));
        }

        let mut keys = vec![];
        for handle in handles {
            keys.push(handle.await.unwrap().unwrap());
        }
        assert!(keys.windows(2).all(|w| w[0] == w[1]));

        let fresh = local_store(&dir, 0);
        let object = fresh.read_original(&keys[0], "").await.unwrap();
        assert_eq!(object.filename, "dup.png");
        assert_eq!(object.data.as_ref(), data.as_slice());
        assert!(store.cache().used() <= store.cache().capacity());
    }

    #[tokio::test]
    async fn test_backend_local_from_config() {
        let dir = TempDir::new().unwrap();
        let store = local_store(&dir, 0);
        assert_eq!(store.backend().kind(), "local");
        assert!(!store.cache().is_enabled());

        // Constructed directly, too.
        let backend = Arc::new(LocalBackend::new(dir.path()).unwrap());
        let store = ContentStore::new(backend, BoundedCache::disabled(), Scaler::default(), Limits::default());
        assert_eq!(store.backend().kind(), "local");
    }
}
