//! BoundedCache: a byte-budgeted in-memory map with FIFO eviction.
//!
//! Entries leave in the order they arrived. Lookups never reorder anything,
//! so a hot entry is evicted just as soon as a cold one inserted at the same
//! time.
//!
//! The used-bytes counter, the insertion queue and the map all live behind a
//! single mutex. `put` runs `prepare` and `insert` inside one critical section
//! so concurrent requests can't leak capacity or leave the queue and the map
//! disagreeing.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use bytes::Bytes;

use crate::error::CacheError;

/// Approximate bookkeeping cost of one map entry, in bytes.
pub const ENTRY_OVERHEAD: u64 = 11;

/// Accounted size of an entry: the key counted twice (map + queue), the
/// payload, and the fixed per-entry overhead.
pub fn entry_size(key_len: usize, value_len: usize) -> u64 {
    2 * key_len as u64 + value_len as u64 + ENTRY_OVERHEAD
}

/// Cache state. Only ever touched through the [`BoundedCache`] lock.
#[derive(Debug, Default)]
pub struct CacheState {
    capacity: u64,
    used: u64,
    order: VecDeque<String>,
    entries: HashMap<String, Bytes>,
}

impl CacheState {
    fn new(capacity: u64) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    /// Make room for `requested` bytes, evicting oldest entries first.
    ///
    /// Fails without evicting anything when `requested` exceeds the whole
    /// capacity.
    pub fn prepare(&mut self, requested: u64) -> Result<(), CacheError> {
        if requested > self.capacity {
            return Err(CacheError::CapacityExceeded {
                requested,
                capacity: self.capacity,
            });
        }

        while self.capacity.saturating_sub(self.used) < requested {
            let Some(key) = self.order.pop_front() else {
                break;
            };
            if let Some(value) = self.entries.remove(&key) {
                let size = entry_size(key.len(), value.len());
                self.used = self.used.saturating_sub(size);
                tracing::debug!(key = %key, size, used = self.used, "evicted cache entry");
            }
        }

        Ok(())
    }

    /// Append an entry at the tail of the insertion order.
    ///
    /// Replacing an existing key drops the old entry's accounting and queue
    /// slot first. Without a preceding `prepare` this may push `used` past
    /// capacity, never below zero.
    pub fn insert(&mut self, key: String, value: Bytes) {
        if let Some(old) = self.entries.remove(&key) {
            self.used = self.used.saturating_sub(entry_size(key.len(), old.len()));
            self.order.retain(|k| k != &key);
        }

        self.used = self.used.saturating_add(entry_size(key.len(), value.len()));
        self.order.push_back(key.clone());
        self.entries.insert(key, value);
    }

    /// Exact-match lookup.
    pub fn lookup(&self, key: &str) -> Option<Bytes> {
        self.entries.get(key).cloned()
    }

    pub fn used(&self) -> u64 {
        self.used
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[cfg(test)]
    fn keys_in_order(&self) -> Vec<&str> {
        self.order.iter().map(String::as_str).collect()
    }
}

/// Thread-safe, capacity-bounded cache of object and variant bytes.
#[derive(Debug)]
pub struct BoundedCache {
    capacity: u64,
    state: Mutex<CacheState>,
}

impl BoundedCache {
    /// Create a cache holding at most `capacity` accounted bytes.
    ///
    /// A capacity of zero disables the cache: every `get` misses and every
    /// `put` is dropped.
    pub fn new(capacity: u64) -> Self {
        tracing::debug!(capacity, "creating bounded cache");
        Self {
            capacity,
            state: Mutex::new(CacheState::new(capacity)),
        }
    }

    pub fn disabled() -> Self {
        Self::new(0)
    }

    pub fn is_enabled(&self) -> bool {
        self.capacity > 0
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Bytes currently accounted to live entries.
    pub fn used(&self) -> u64 {
        self.lock().used()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn get(&self, key: &str) -> Option<Bytes> {
        if !self.is_enabled() {
            return None;
        }
        self.lock().lookup(key)
    }

    /// Prepare space and insert in one step.
    pub fn put(&self, key: String, value: Bytes) -> Result<(), CacheError> {
        if !self.is_enabled() {
            return Ok(());
        }

        let mut state = self.lock();
        state.prepare(entry_size(key.len(), value.len()))?;
        state.insert(key, value);
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
