//! Error types for the store, its backends, the scaler and the cache.

use thiserror::Error;

use crate::key::KeyError;

/// Result alias used throughout the store.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors surfaced by [`ContentStore`](crate::ContentStore) and its backends.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no object stored for {key}/{filename}")]
    NotFound { key: String, filename: String },

    #[error("no encoder for image format {0}")]
    UnsupportedFormat(String),

    #[error("failed to decode image: {0}")]
    Decode(String),

    #[error("resampling failed: {0}")]
    Resample(String),

    #[error("failed to encode image: {0}")]
    Encode(String),

    #[error("invalid filename: {0:?}")]
    InvalidFilename(String),

    #[error(transparent)]
    InvalidKey(#[from] KeyError),

    #[error("dimensions {width}x{height} outside allowed range {min}..={max}")]
    InvalidDimensions {
        width: u32,
        height: u32,
        min: u32,
        max: u32,
    },

    #[error("dimensions {width}x{height} exceed the budget of {max_pixels} pixels")]
    TooManyPixels {
        width: u32,
        height: u32,
        max_pixels: u64,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("remote backend request failed: {0}")]
    Remote(#[from] reqwest::Error),

    #[error("remote backend returned {status} for {url}")]
    RemoteStatus {
        status: reqwest::StatusCode,
        url: String,
    },

    #[error("background task failed: {0}")]
    Task(String),
}

impl StoreError {
    pub(crate) fn not_found(key: &str, filename: &str) -> Self {
        Self::NotFound {
            key: key.to_string(),
            filename: filename.to_string(),
        }
    }

    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Cache failures. Absorbed by the store, never returned to its callers.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("entry of {requested} bytes can never fit in a {capacity} byte cache")]
    CapacityExceeded { requested: u64, capacity: u64 },
}
