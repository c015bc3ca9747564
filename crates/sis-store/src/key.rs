//! ContentKey: the MD5 digest of an object's bytes as 32 lowercase hex chars.
//!
//! Keys are derived from content alone, so the same bytes uploaded under two
//! different filenames land under the same key.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Length of a content key in hex characters.
pub const KEY_LEN: usize = 32;

/// A content key - 128 bits (16 bytes, 32 hex chars) of MD5.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentKey(String);

/// Errors that can occur when parsing content keys.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("invalid key length: expected 32 hex chars, got {0}")]
    InvalidLength(usize),

    #[error("invalid hex character in key")]
    InvalidHex,
}

impl ContentKey {
    /// Digest data and return its content key.
    pub fn from_data(data: &[u8]) -> Self {
        let digest = md5::compute(data);
        Self(hex::encode(digest.0))
    }

    /// Create from an existing key string (validates format).
    pub fn from_str_checked(s: &str) -> Result<Self, KeyError> {
        if s.len() != KEY_LEN {
            return Err(KeyError::InvalidLength(s.len()));
        }
        if !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(KeyError::InvalidHex);
        }
        Ok(Self(s.to_ascii_lowercase()))
    }

    /// The key's characters, one per directory level of the local layout.
    pub fn shards(&self) -> impl Iterator<Item = char> + '_ {
        self.0.chars()
    }

    /// Get the full key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ContentKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_str_checked(s)
    }
}

impl AsRef<str> for ContentKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Cache lookup key for a stored object or one of its resized variants.
///
/// Never persisted: resized variants only ever live in the cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VariantKey<'a> {
    pub key: &'a ContentKey,
    pub filename: &'a str,
    pub dims: Option<(u32, u32)>,
}

impl<'a> VariantKey<'a> {
    pub fn raw(key: &'a ContentKey, filename: &'a str) -> Self {
        Self {
            key,
            filename,
            dims: None,
        }
    }

    pub fn scaled(key: &'a ContentKey, filename: &'a str, width: u32, height: u32) -> Self {
        Self {
            key,
            filename,
            dims: Some((width, height)),
        }
    }
}

/// Renders as `{key}/{filename}` or `{key}/{filename}/{w}x{h}`.
///
/// Filenames never contain `/`, so two distinct variants can't render alike.
impl fmt::Display for VariantKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.dims {
            Some((w, h)) => write!(f, "{}/{}/{}x{}", self.key, self.filename, w, h),
            None => write!(f, "{}/{}", self.key, self.filename),
        }
    }
}

/// Check that a filename can be used as a leaf under a backend directory.
///
/// Rejects empty names, names longer than `max_len` bytes, path separators,
/// NUL and the `.`/`..` directory entries.
pub fn is_safe_filename(name: &str, max_len: usize) -> bool {
    !name.is_empty()
        && name.len() <= max_len
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}
