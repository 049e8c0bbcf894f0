//! Storage backend trait and the values that flow through it.
//!
//! Every backend exposes the same key/value contract over a single value
//! type. Cache wrappers hold one typed view per kind of value they store
//! (entries, section indexes, page totals) and never keep values outside
//! the backend.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use utilkits_core::{Timestamp, UtilKitsResult};

use super::key::ScopedKey;

/// Marker trait for values a backend can hold.
///
/// - `Clone` because reads hand out copies, never references into the table
/// - `PartialEq` for compare-and-swap
/// - `Serialize`/`DeserializeOwned` so the distributed backend can marshal them
pub trait CacheValue: Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> CacheValue for T where
    T: Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

/// A stored value together with the instant it was written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub data: T,
    pub cache_time: Timestamp,
}

impl<T> CacheEntry<T> {
    pub fn new(data: T, cache_time: Timestamp) -> Self {
        Self { data, cache_time }
    }
}

/// Called with the key of an entry the backend expired on its own.
pub type EvictionCallback = Arc<dyn Fn(&ScopedKey) + Send + Sync>;

/// Per-write expiration and eviction settings.
///
/// Sliding and absolute expiration may be combined; whichever deadline is
/// reached first wins.
#[derive(Clone, Default)]
pub struct EntryOptions {
    /// Expire after this long without being read.
    pub sliding_expiration: Option<Duration>,
    /// Expire at this instant.
    pub absolute_expiration: Option<Timestamp>,
    /// Expire this long after the write.
    pub absolute_expiration_relative_to_now: Option<Duration>,
    /// Invoked when the backend expires the entry.
    pub on_evict: Option<EvictionCallback>,
}

impl EntryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sliding_expiration(mut self, window: Duration) -> Self {
        self.sliding_expiration = Some(window);
        self
    }

    pub fn with_absolute_expiration(mut self, at: Timestamp) -> Self {
        self.absolute_expiration = Some(at);
        self
    }

    pub fn with_absolute_expiration_relative_to_now(mut self, ttl: Duration) -> Self {
        self.absolute_expiration_relative_to_now = Some(ttl);
        self
    }

    pub fn with_eviction_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&ScopedKey) + Send + Sync + 'static,
    {
        self.on_evict = Some(Arc::new(callback));
        self
    }

    /// The earlier of the two absolute deadlines, if any.
    pub fn absolute_deadline(&self, now: Timestamp) -> Option<Timestamp> {
        let relative = self
            .absolute_expiration_relative_to_now
            .map(|ttl| now.checked_add_signed(to_time_delta(ttl)).unwrap_or(Timestamp::MAX_UTC));
        match (self.absolute_expiration, relative) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

impl fmt::Debug for EntryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryOptions")
            .field("sliding_expiration", &self.sliding_expiration)
            .field("absolute_expiration", &self.absolute_expiration)
            .field(
                "absolute_expiration_relative_to_now",
                &self.absolute_expiration_relative_to_now,
            )
            .field("on_evict", &self.on_evict.is_some())
            .finish()
    }
}

pub(crate) fn to_time_delta(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

/// Expiration policy a cache wrapper applies to every write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiration {
    /// Reset the deadline on every read.
    Sliding(Duration),
    /// Fixed lifetime from the write.
    Absolute(Duration),
}

impl Expiration {
    pub fn to_options(self) -> EntryOptions {
        match self {
            Self::Sliding(window) => EntryOptions::new().with_sliding_expiration(window),
            Self::Absolute(ttl) => {
                EntryOptions::new().with_absolute_expiration_relative_to_now(ttl)
            }
        }
    }
}

/// Key/value storage contract shared by the local and distributed backends.
///
/// Implementations must be thread-safe. Errors from the underlying store
/// propagate unchanged; an absent key is `Ok(None)`, never an error.
pub trait CacheStorage<T: CacheValue>: Send + Sync {
    /// Short backend name for logs.
    fn backend_name(&self) -> &'static str;

    /// Probe the backend. Local storage is always reachable.
    fn is_connected(&self) -> bool;

    fn exists(&self, key: &ScopedKey) -> UtilKitsResult<bool>;

    fn get(&self, key: &ScopedKey) -> UtilKitsResult<Option<T>>;

    /// Values for the keys that exist, in request order.
    fn multi_get(&self, keys: &[ScopedKey]) -> UtilKitsResult<Vec<T>> {
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.get(key)? {
                values.push(value);
            }
        }
        Ok(values)
    }

    /// Store without expiration.
    fn set(&self, key: &ScopedKey, value: T) -> UtilKitsResult<()> {
        self.set_with_options(key, value, EntryOptions::default())
    }

    /// Store with an absolute lifetime.
    fn set_with_ttl(&self, key: &ScopedKey, value: T, ttl: Duration) -> UtilKitsResult<()> {
        self.set_with_options(
            key,
            value,
            EntryOptions::new().with_absolute_expiration_relative_to_now(ttl),
        )
    }

    fn set_with_options(&self, key: &ScopedKey, value: T, options: EntryOptions)
        -> UtilKitsResult<()>;

    fn multi_set(&self, values: HashMap<ScopedKey, T>) -> UtilKitsResult<()> {
        for (key, value) in values {
            self.set(&key, value)?;
        }
        Ok(())
    }

    /// Replace the value only if the stored one equals `expected`.
    ///
    /// Returns `Ok(false)` when the key is absent or holds something else.
    /// Both backends perform the comparison and the write as one atomic
    /// step on the store.
    fn compare_and_swap(&self, key: &ScopedKey, expected: &T, new_value: T)
        -> UtilKitsResult<bool>;

    fn delete(&self, key: &ScopedKey) -> UtilKitsResult<()>;

    fn multi_delete(&self, keys: &[ScopedKey]) -> UtilKitsResult<()> {
        for key in keys {
            self.delete(key)?;
        }
        Ok(())
    }

    fn stats(&self) -> UtilKitsResult<CacheStats>;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of reads that found a value.
    pub hits: u64,
    /// Number of reads that found nothing.
    pub misses: u64,
    /// Number of entries currently held (0 when the backend cannot tell).
    pub entry_count: u64,
    /// Number of entries the backend expired on its own.
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
