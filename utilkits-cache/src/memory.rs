//! In-process cache backend with sliding and absolute expiration.
//!
//! All typed views created from one `MemoryTable` share a single slot map,
//! and `MemoryTable::global()` is the process-wide instance every store
//! uses unless handed an isolated table.
//!
//! # Expiration
//!
//! Expired slots are removed lazily when their key is touched, and by a
//! sweep over the whole table that runs on access once `scan_frequency`
//! has elapsed since the previous sweep. `purge_expired` forces a sweep.
//!
//! # Eviction callbacks
//!
//! Callbacks registered through [`EntryOptions::on_evict`] run when the
//! table expires a slot, after the table lock is released, so a callback
//! may freely read and write the same table. Overwriting a slot whose
//! deadline has passed counts as expiring it. Explicit deletes and
//! overwrites of live slots do not invoke them.

use std::any::{type_name, Any};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use once_cell::sync::Lazy;
use tracing::debug;
use utilkits_core::{
    system_clock, CacheError, SharedClock, Timestamp, UtilKitsError, UtilKitsResult,
};

use super::key::ScopedKey;
use super::traits::{
    to_time_delta, CacheStats, CacheStorage, CacheValue, EntryOptions, EvictionCallback,
};

const DEFAULT_SCAN_FREQUENCY: Duration = Duration::from_secs(60);

static GLOBAL_TABLE: Lazy<MemoryTable> = Lazy::new(MemoryTable::new);

type SlotMap = HashMap<String, Slot>;

struct Slot {
    key: ScopedKey,
    value: Box<dyn Any + Send + Sync>,
    sliding: Option<chrono::Duration>,
    absolute: Option<Timestamp>,
    last_access: Timestamp,
    on_evict: Option<EvictionCallback>,
}

impl Slot {
    fn is_expired(&self, now: Timestamp) -> bool {
        if self.absolute.is_some_and(|deadline| now >= deadline) {
            return true;
        }
        match self.sliding {
            Some(window) => self
                .last_access
                .checked_add_signed(window)
                .is_some_and(|deadline| now >= deadline),
            None => false,
        }
    }
}

struct TableInner {
    slots: Mutex<SlotMap>,
    stats: RwLock<CacheStats>,
    clock: SharedClock,
    scan_frequency_ms: AtomicU64,
    last_scan: Mutex<Timestamp>,
}

/// Shared in-process slot table.
///
/// Cloning is cheap and yields a handle to the same table.
#[derive(Clone)]
pub struct MemoryTable {
    inner: Arc<TableInner>,
}

impl Default for MemoryTable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryTable")
            .field("entries", &self.len())
            .field("clock", &self.inner.clock)
            .finish()
    }
}

impl MemoryTable {
    /// Create an isolated table on the wall clock.
    pub fn new() -> Self {
        Self::with_clock(system_clock())
    }

    /// Create an isolated table driven by the given clock.
    pub fn with_clock(clock: SharedClock) -> Self {
        let now = clock.now();
        Self {
            inner: Arc::new(TableInner {
                slots: Mutex::new(HashMap::new()),
                stats: RwLock::new(CacheStats::default()),
                clock,
                scan_frequency_ms: AtomicU64::new(DEFAULT_SCAN_FREQUENCY.as_millis() as u64),
                last_scan: Mutex::new(now),
            }),
        }
    }

    /// The process-wide table.
    pub fn global() -> Self {
        GLOBAL_TABLE.clone()
    }

    pub fn clock(&self) -> SharedClock {
        Arc::clone(&self.inner.clock)
    }

    pub fn scan_frequency(&self) -> Duration {
        Duration::from_millis(self.inner.scan_frequency_ms.load(Ordering::Relaxed))
    }

    /// How often an access also sweeps the whole table for expired slots.
    pub fn set_scan_frequency(&self, frequency: Duration) {
        self.inner
            .scan_frequency_ms
            .store(frequency.as_millis() as u64, Ordering::Relaxed);
    }

    /// A typed view over this table.
    pub fn storage<T: CacheValue>(&self) -> MemoryStorage<T> {
        MemoryStorage {
            table: self.clone(),
            _marker: PhantomData,
        }
    }

    /// Number of slots held, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.inner
            .slots
            .lock()
            .map(|slots| slots.len())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every expired slot now, running eviction callbacks.
    ///
    /// Returns the number of slots removed.
    pub fn purge_expired(&self) -> UtilKitsResult<usize> {
        let now = self.inner.clock.now();
        let mut evicted = Vec::new();
        {
            let mut slots = self.lock_slots()?;
            Self::sweep(&mut slots, now, &mut evicted);
            *self.lock_last_scan() = now;
        }
        let removed = evicted.len();
        self.notify_evicted(evicted);
        Ok(removed)
    }

    /// Table-wide statistics.
    pub fn stats(&self) -> CacheStats {
        let mut stats = self
            .inner
            .stats
            .read()
            .map(|s| s.clone())
            .unwrap_or_default();
        stats.entry_count = self.len() as u64;
        stats
    }

    // ------------------------------------------------------------------------
    // Slot access
    // ------------------------------------------------------------------------

    fn lock_slots(&self) -> UtilKitsResult<MutexGuard<'_, SlotMap>> {
        self.inner
            .slots
            .lock()
            .map_err(|_| CacheError::LockPoisoned.into())
    }

    fn lock_last_scan(&self) -> MutexGuard<'_, Timestamp> {
        self.inner
            .last_scan
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `f` against the live slot for `key`, expiring it first if due.
    fn access<R>(
        &self,
        key: &ScopedKey,
        touch: bool,
        f: impl FnOnce(Option<&mut Slot>) -> R,
    ) -> UtilKitsResult<R> {
        let now = self.inner.clock.now();
        let encoded = key.encode();
        let mut evicted = Vec::new();
        let result = {
            let mut slots = self.lock_slots()?;
            self.sweep_if_due(&mut slots, now, &mut evicted);
            if slots.get(&encoded).is_some_and(|slot| slot.is_expired(now)) {
                evicted.extend(slots.remove(&encoded));
            }
            let slot = slots.get_mut(&encoded).map(|slot| {
                if touch {
                    slot.last_access = now;
                }
                slot
            });
            f(slot)
        };
        self.notify_evicted(evicted);
        Ok(result)
    }

    fn insert(
        &self,
        key: &ScopedKey,
        value: Box<dyn Any + Send + Sync>,
        options: EntryOptions,
    ) -> UtilKitsResult<()> {
        let now = self.inner.clock.now();
        let absolute = options.absolute_deadline(now);
        let slot = Slot {
            key: key.clone(),
            value,
            sliding: options.sliding_expiration.map(to_time_delta),
            absolute,
            last_access: now,
            on_evict: options.on_evict,
        };

        let mut evicted = Vec::new();
        let replaced = {
            let mut slots = self.lock_slots()?;
            self.sweep_if_due(&mut slots, now, &mut evicted);
            match slots.insert(key.encode(), slot) {
                // Overwriting a slot past its deadline still counts as its expiry.
                Some(old) if old.is_expired(now) => {
                    evicted.push(old);
                    None
                }
                other => other,
            }
        };
        drop(replaced);
        self.notify_evicted(evicted);
        Ok(())
    }

    fn remove(&self, key: &ScopedKey) -> UtilKitsResult<bool> {
        let removed = self.lock_slots()?.remove(&key.encode());
        Ok(removed.is_some())
    }

    fn get<T: CacheValue>(&self, key: &ScopedKey) -> UtilKitsResult<Option<T>> {
        let found = self.access(key, true, |slot| {
            slot.map(|slot| {
                slot.value
                    .downcast_ref::<T>()
                    .cloned()
                    .ok_or_else(|| type_mismatch::<T>(key))
            })
            .transpose()
        })??;

        if found.is_some() {
            self.record(|stats| stats.hits += 1);
        } else {
            self.record(|stats| stats.misses += 1);
        }
        Ok(found)
    }

    fn compare_and_swap<T: CacheValue>(
        &self,
        key: &ScopedKey,
        expected: &T,
        new_value: T,
    ) -> UtilKitsResult<bool> {
        self.access(key, true, |slot| match slot {
            None => Ok(false),
            Some(slot) => match slot.value.downcast_ref::<T>() {
                Some(current) if current == expected => {
                    slot.value = Box::new(new_value);
                    Ok(true)
                }
                Some(_) => Ok(false),
                None => Err(type_mismatch::<T>(key)),
            },
        })?
    }

    fn sweep_if_due(&self, slots: &mut SlotMap, now: Timestamp, evicted: &mut Vec<Slot>) {
        let frequency = self.scan_frequency();
        let mut last_scan = self.lock_last_scan();
        let due = (now - *last_scan)
            .to_std()
            .map(|elapsed| elapsed >= frequency)
            .unwrap_or(false);
        if due {
            *last_scan = now;
            drop(last_scan);
            Self::sweep(slots, now, evicted);
        }
    }

    fn sweep(slots: &mut SlotMap, now: Timestamp, evicted: &mut Vec<Slot>) {
        let expired: Vec<String> = slots
            .iter()
            .filter(|(_, slot)| slot.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in expired {
            evicted.extend(slots.remove(&key));
        }
    }

    fn notify_evicted(&self, evicted: Vec<Slot>) {
        if evicted.is_empty() {
            return;
        }
        let count = evicted.len() as u64;
        self.record(|stats| stats.evictions += count);

        for Slot { key, on_evict, .. } in evicted {
            debug!(key = %key, "memory cache entry expired");
            if let Some(callback) = on_evict {
                callback(&key);
            }
        }
    }

    fn record(&self, update: impl FnOnce(&mut CacheStats)) {
        if let Ok(mut stats) = self.inner.stats.write() {
            update(&mut stats);
        }
    }
}

fn type_mismatch<T>(key: &ScopedKey) -> UtilKitsError {
    CacheError::TypeMismatch {
        key: key.encode(),
        expected: type_name::<T>(),
    }
    .into()
}

/// Typed view over a [`MemoryTable`].
pub struct MemoryStorage<T> {
    table: MemoryTable,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for MemoryStorage<T> {
    fn clone(&self) -> Self {
        Self {
            table: self.table.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for MemoryStorage<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStorage")
            .field("value_type", &type_name::<T>())
            .field("table", &self.table)
            .finish()
    }
}

impl<T: CacheValue> MemoryStorage<T> {
    /// A view over the process-wide table.
    pub fn global() -> Self {
        MemoryTable::global().storage()
    }

    pub fn table(&self) -> &MemoryTable {
        &self.table
    }
}

impl<T: CacheValue> CacheStorage<T> for MemoryStorage<T> {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    fn is_connected(&self) -> bool {
        true
    }

    fn exists(&self, key: &ScopedKey) -> UtilKitsResult<bool> {
        self.table.access(key, true, |slot| slot.is_some())
    }

    fn get(&self, key: &ScopedKey) -> UtilKitsResult<Option<T>> {
        self.table.get::<T>(key)
    }

    fn set_with_options(
        &self,
        key: &ScopedKey,
        value: T,
        options: EntryOptions,
    ) -> UtilKitsResult<()> {
        self.table.insert(key, Box::new(value), options)
    }

    fn compare_and_swap(
        &self,
        key: &ScopedKey,
        expected: &T,
        new_value: T,
    ) -> UtilKitsResult<bool> {
        self.table.compare_and_swap(key, expected, new_value)
    }

    fn delete(&self, key: &ScopedKey) -> UtilKitsResult<()> {
        self.table.remove(key).map(|_| ())
    }

    fn stats(&self) -> UtilKitsResult<CacheStats> {
        Ok(self.table.stats())
    }
}
