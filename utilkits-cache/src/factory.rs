//! Single-entry cache with lazy population and cascading invalidation.
//!
//! A `CacheFactory<T>` manages one logical value behind one key. Values are
//! populated by the first reader that misses, stored with their write time,
//! and removed on explicit delete or when the backend expires them.
//!
//! Behaviour that varies between cache kinds is injected rather than
//! inherited:
//! - a [`CacheDependents`] strategy decides what else must go when this
//!   entry goes (nothing for a plain cache, the rest of the section for a
//!   section or page cache)
//! - an optional populate-on-miss binder supplies the value for [`CacheFactory::get`]

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};
use utilkits_core::{SharedClock, Timestamp, UtilKitsError, UtilKitsResult};

use super::flight::FlightRegistry;
use super::freshness::{over_dependency_time, CacheRead, CacheTimed};
use super::key::ScopedKey;
use super::store::CacheStore;
use super::traits::{CacheEntry, CacheStorage, CacheValue, Expiration};

/// What to invalidate alongside an entry.
pub trait CacheDependents: Send + Sync {
    /// Called after `key` was written and is present in the backend.
    fn record(&self, key: &ScopedKey) -> UtilKitsResult<()>;

    /// Called after `key` was deleted or expired.
    fn remove_dependents(&self, key: &ScopedKey) -> UtilKitsResult<()>;
}

/// A standalone entry: nothing depends on it.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDependents;

impl CacheDependents for NoDependents {
    fn record(&self, _key: &ScopedKey) -> UtilKitsResult<()> {
        Ok(())
    }

    fn remove_dependents(&self, _key: &ScopedKey) -> UtilKitsResult<()> {
        Ok(())
    }
}

/// Supplies a value when [`CacheFactory::get`] misses.
pub type PopulateOnMiss<T> = Arc<dyn Fn() -> UtilKitsResult<Option<T>> + Send + Sync>;

/// Cache wrapper for one value under one key.
pub struct CacheFactory<T: CacheValue> {
    key: ScopedKey,
    storage: Arc<dyn CacheStorage<CacheEntry<T>>>,
    expiration: Option<Expiration>,
    dependents: Arc<dyn CacheDependents>,
    populate_on_miss: Option<PopulateOnMiss<T>>,
    clock: SharedClock,
    flights: Arc<FlightRegistry>,
}

impl<T: CacheValue> Clone for CacheFactory<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            storage: Arc::clone(&self.storage),
            expiration: self.expiration,
            dependents: Arc::clone(&self.dependents),
            populate_on_miss: self.populate_on_miss.clone(),
            clock: Arc::clone(&self.clock),
            flights: Arc::clone(&self.flights),
        }
    }
}

impl<T: CacheValue> fmt::Debug for CacheFactory<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheFactory")
            .field("key", &self.key)
            .field("backend", &self.storage.backend_name())
            .field("expiration", &self.expiration)
            .field("populate_on_miss", &self.populate_on_miss.is_some())
            .finish()
    }
}

impl<T: CacheValue> CacheFactory<T> {
    /// A standalone cache for `name` in the store's namespace.
    pub fn new(store: &CacheStore, name: impl Into<String>) -> Self {
        Self::with_key(store, store.key(name))
    }

    pub(crate) fn with_key(store: &CacheStore, key: ScopedKey) -> Self {
        Self {
            key,
            storage: store.storage(),
            expiration: store.default_expiration(),
            dependents: Arc::new(NoDependents),
            populate_on_miss: None,
            clock: store.clock(),
            flights: store.flights(),
        }
    }

    /// Expiration applied to every write from this wrapper.
    pub fn with_expiration(mut self, expiration: Expiration) -> Self {
        self.expiration = Some(expiration);
        self
    }

    /// Store values without expiration, ignoring the store default.
    pub fn without_expiration(mut self) -> Self {
        self.expiration = None;
        self
    }

    /// Bind the populate callback used by [`get`](Self::get).
    pub fn with_populate_on_miss<F>(mut self, populate: F) -> Self
    where
        F: Fn() -> UtilKitsResult<Option<T>> + Send + Sync + 'static,
    {
        self.populate_on_miss = Some(Arc::new(populate));
        self
    }

    /// Replace the invalidation strategy.
    pub fn with_dependents(mut self, dependents: Arc<dyn CacheDependents>) -> Self {
        self.dependents = dependents;
        self
    }

    pub fn key(&self) -> &ScopedKey {
        &self.key
    }

    pub fn expiration(&self) -> Option<Expiration> {
        self.expiration
    }

    pub fn exists(&self) -> UtilKitsResult<bool> {
        self.storage.exists(&self.key)
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    /// Read the value, running the bound populate callback on a miss.
    ///
    /// Without a bound callback a miss simply returns `None`.
    pub fn get(&self) -> UtilKitsResult<Option<T>> {
        match &self.populate_on_miss {
            Some(populate) => {
                let populate = Arc::clone(populate);
                self.fill(move || populate(), || self.peek())
            }
            None => self.peek(),
        }
    }

    /// Read the value, computing and storing it on a miss.
    ///
    /// A populate result of `None` is not cached and is returned as `None`.
    pub fn get_with<F, V>(&self, populate: F) -> UtilKitsResult<Option<T>>
    where
        F: FnOnce() -> V,
        V: Into<Option<T>>,
    {
        self.try_get_with(|| Ok::<_, UtilKitsError>(populate()))
    }

    /// Like [`get_with`](Self::get_with) for a fallible populate callback.
    ///
    /// A populate error is returned unchanged and nothing is stored.
    pub fn try_get_with<F, V, E>(&self, populate: F) -> Result<Option<T>, E>
    where
        F: FnOnce() -> Result<V, E>,
        V: Into<Option<T>>,
        E: From<UtilKitsError>,
    {
        self.fill(
            || populate().map(Into::into),
            || -> Result<Option<T>, E> { Ok(self.peek()?) },
        )
    }

    /// Read the value, recomputing it when absent or when `should_refresh`
    /// says the stored one is stale.
    ///
    /// `should_refresh` is only consulted while a value is present, and is
    /// asked again after acquiring the population lock so that a refresh
    /// completed by another thread is not repeated.
    pub fn get_with_refresh<F, V, R>(
        &self,
        populate: F,
        should_refresh: R,
    ) -> UtilKitsResult<Option<T>>
    where
        F: FnOnce() -> V,
        V: Into<Option<T>>,
        R: FnMut() -> UtilKitsResult<bool>,
    {
        self.try_get_with_refresh(|| Ok::<_, UtilKitsError>(populate()), should_refresh)
    }

    /// Like [`get_with_refresh`](Self::get_with_refresh) for a fallible
    /// populate callback.
    pub fn try_get_with_refresh<F, V, E, R>(
        &self,
        populate: F,
        mut should_refresh: R,
    ) -> Result<Option<T>, E>
    where
        F: FnOnce() -> Result<V, E>,
        V: Into<Option<T>>,
        E: From<UtilKitsError>,
        R: FnMut() -> UtilKitsResult<bool>,
    {
        self.fill(
            || populate().map(Into::into),
            || -> Result<Option<T>, E> {
                match self.peek()? {
                    Some(value) if !should_refresh()? => Ok(Some(value)),
                    _ => Ok(None),
                }
            },
        )
    }

    /// Read the value with its write time, populating on a miss.
    pub fn read<F, V>(&self, populate: F) -> UtilKitsResult<Option<CacheRead<T>>>
    where
        F: FnOnce() -> V,
        V: Into<Option<T>>,
    {
        if let Some(entry) = self.storage.get(&self.key)? {
            return Ok(Some(CacheRead::from_cache(entry.data, entry.cache_time)));
        }

        self.flights.run(&self.key.encode(), || -> UtilKitsResult<_> {
            if let Some(entry) = self.storage.get(&self.key)? {
                return Ok(Some(CacheRead::from_cache(entry.data, entry.cache_time)));
            }
            self.set(populate())?;
            Ok(self
                .storage
                .get(&self.key)?
                .map(|entry| CacheRead::from_populate(entry.data, entry.cache_time)))
        })
    }

    /// When the current value was written, or `None` if nothing is cached.
    pub fn get_cache_time(&self) -> UtilKitsResult<Option<Timestamp>> {
        Ok(self.storage.get(&self.key)?.map(|entry| entry.cache_time))
    }

    /// True when a value is cached and was written more than `max_age` ago.
    ///
    /// Usable directly as a refresh predicate:
    /// `cache.get_with_refresh(load, || cache.is_older_than(max_age))`.
    pub fn is_older_than(&self, max_age: Duration) -> UtilKitsResult<bool> {
        let Some(cache_time) = self.get_cache_time()? else {
            return Ok(false);
        };
        let age = (self.clock.now() - cache_time)
            .to_std()
            .unwrap_or(Duration::ZERO);
        Ok(age > max_age)
    }

    /// True when `other` holds a value written strictly after this one.
    pub fn over_dependency_time<O: CacheTimed + ?Sized>(&self, other: &O) -> UtilKitsResult<bool> {
        over_dependency_time(self, other)
    }

    // ------------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------------

    /// Store a value stamped with the current time.
    ///
    /// `None` is not stored: the call is a no-op and `exists()` stays false.
    ///
    /// Replacing a live value counts as removing it: dependents other than
    /// this key are invalidated before this key is recorded again.
    pub fn set(&self, value: impl Into<Option<T>>) -> UtilKitsResult<()> {
        let Some(data) = value.into() else {
            debug!(key = %self.key, "skipping cache write of empty value");
            return Ok(());
        };

        let entry = CacheEntry::new(data, self.clock.now());
        let dependents = Arc::clone(&self.dependents);
        let options = self
            .expiration
            .map(Expiration::to_options)
            .unwrap_or_default()
            .with_eviction_callback(move |key| {
                if let Err(e) = dependents.remove_dependents(key) {
                    warn!(key = %key, error = %e, "cascade after eviction failed");
                }
            });

        let replacing = self.storage.exists(&self.key)?;
        self.storage.set_with_options(&self.key, entry, options)?;

        if replacing {
            debug!(key = %self.key, "replaced cache entry, invalidating dependents");
            self.dependents.remove_dependents(&self.key)?;
        }
        if self.storage.exists(&self.key)? {
            self.dependents.record(&self.key)?;
        }
        Ok(())
    }

    /// Remove the value and everything that depends on it.
    pub fn delete(&self) -> UtilKitsResult<()> {
        self.storage.delete(&self.key)?;
        self.dependents.remove_dependents(&self.key)
    }

    /// Remove only this value.
    pub fn delete_without_cascade(&self) -> UtilKitsResult<()> {
        self.storage.delete(&self.key)
    }

    /// Read without populating.
    pub(crate) fn peek(&self) -> UtilKitsResult<Option<T>> {
        Ok(self.storage.get(&self.key)?.map(|entry| entry.data))
    }

    /// Return the current value if `current` yields one, otherwise populate
    /// under this key's flight lock and read back.
    fn fill<P, C, E>(&self, populate: P, mut current: C) -> Result<Option<T>, E>
    where
        P: FnOnce() -> Result<Option<T>, E>,
        C: FnMut() -> Result<Option<T>, E>,
        E: From<UtilKitsError>,
    {
        if let Some(value) = current()? {
            return Ok(Some(value));
        }

        self.flights.run(&self.key.encode(), || -> Result<Option<T>, E> {
            if let Some(value) = current()? {
                return Ok(Some(value));
            }
            debug!(key = %self.key, "populating cache entry");
            let value = populate()?;
            self.set(value)?;
            Ok(self.peek()?)
        })
    }
}

impl<T: CacheValue> CacheTimed for CacheFactory<T> {
    fn get_cache_time(&self) -> UtilKitsResult<Option<Timestamp>> {
        CacheFactory::get_cache_time(self)
    }
}
