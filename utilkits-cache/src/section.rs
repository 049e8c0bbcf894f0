//! Section caches: entries that invalidate together.
//!
//! Every member of a section records its key in a `SectionIndex` stored
//! under the section key. Deleting or expiring any member deletes every
//! other recorded key and then the index itself. Member deletes during a
//! cascade go straight to the backend, so they do not cascade again.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;
use utilkits_core::{CacheError, Timestamp, UtilKitsResult};

use super::factory::{CacheDependents, CacheFactory};
use super::flight::FlightRegistry;
use super::freshness::{CacheRead, CacheTimed};
use super::key::ScopedKey;
use super::store::CacheStore;
use super::traits::{CacheStorage, CacheValue, Expiration};

/// Attempts at appending to an index that keeps changing underneath us.
const MAX_APPEND_ATTEMPTS: usize = 16;

/// Ordered, de-duplicated member keys of one section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionIndex {
    keys: Vec<ScopedKey>,
}

impl SectionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `key` unless already present. Returns whether it was added.
    pub fn insert(&mut self, key: ScopedKey) -> bool {
        if self.contains(&key) {
            return false;
        }
        self.keys.push(key);
        true
    }

    pub fn contains(&self, key: &ScopedKey) -> bool {
        self.keys.contains(key)
    }

    pub fn keys(&self) -> &[ScopedKey] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl FromIterator<ScopedKey> for SectionIndex {
    fn from_iter<I: IntoIterator<Item = ScopedKey>>(iter: I) -> Self {
        let mut index = Self::new();
        for key in iter {
            index.insert(key);
        }
        index
    }
}

/// The section index of one section, acting as the dependents strategy
/// of its members.
pub struct SectionDependents {
    section_key: ScopedKey,
    index: Arc<dyn CacheStorage<SectionIndex>>,
    flights: Arc<FlightRegistry>,
}

impl fmt::Debug for SectionDependents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SectionDependents")
            .field("section_key", &self.section_key)
            .field("backend", &self.index.backend_name())
            .finish()
    }
}

impl SectionDependents {
    pub fn new(store: &CacheStore, section_key: ScopedKey) -> Self {
        Self {
            section_key,
            index: store.storage(),
            flights: store.flights(),
        }
    }

    pub fn section_key(&self) -> &ScopedKey {
        &self.section_key
    }

    /// Keys currently recorded in the section.
    pub fn members(&self) -> UtilKitsResult<Vec<ScopedKey>> {
        Ok(self
            .index
            .get(&self.section_key)?
            .map(|index| index.keys)
            .unwrap_or_default())
    }

    /// Record `key` as a member.
    ///
    /// Serialized per section within the process; concurrent writers in
    /// other processes are detected by compare-and-swap and retried.
    pub fn append(&self, key: &ScopedKey) -> UtilKitsResult<()> {
        self.flights.run(&self.section_key.encode(), || -> UtilKitsResult<()> {
            for _ in 0..MAX_APPEND_ATTEMPTS {
                match self.index.get(&self.section_key)? {
                    None => {
                        debug!(section = %self.section_key, key = %key, "creating section index");
                        let index: SectionIndex = std::iter::once(key.clone()).collect();
                        return self.index.set(&self.section_key, index);
                    }
                    Some(current) if current.contains(key) => return Ok(()),
                    Some(current) => {
                        let mut next = current.clone();
                        next.insert(key.clone());
                        if self
                            .index
                            .compare_and_swap(&self.section_key, &current, next)?
                        {
                            debug!(
                                section = %self.section_key,
                                key = %key,
                                "appended to section index"
                            );
                            return Ok(());
                        }
                    }
                }
            }
            Err(CacheError::Backend {
                reason: format!(
                    "section index {} changed on every append attempt",
                    self.section_key
                ),
            }
            .into())
        })
    }
}

impl CacheDependents for SectionDependents {
    fn record(&self, key: &ScopedKey) -> UtilKitsResult<()> {
        self.append(key)
    }

    fn remove_dependents(&self, key: &ScopedKey) -> UtilKitsResult<()> {
        let Some(index) = self.index.get(&self.section_key)? else {
            return Ok(());
        };

        let others: Vec<ScopedKey> = index
            .keys()
            .iter()
            .filter(|member| *member != key)
            .cloned()
            .collect();
        debug!(
            section = %self.section_key,
            trigger = %key,
            removed = others.len(),
            "cascading section invalidation"
        );

        // Deletes are untyped in every backend, so the index view serves
        // for members of any value type.
        self.index.multi_delete(&others)?;
        self.index.delete(&self.section_key)
    }
}

/// A single-entry cache that belongs to a section.
pub struct CacheSectionFactory<T: CacheValue> {
    factory: CacheFactory<T>,
    section: Arc<SectionDependents>,
}

impl<T: CacheValue> Clone for CacheSectionFactory<T> {
    fn clone(&self) -> Self {
        Self {
            factory: self.factory.clone(),
            section: Arc::clone(&self.section),
        }
    }
}

impl<T: CacheValue> fmt::Debug for CacheSectionFactory<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheSectionFactory")
            .field("key", self.factory.key())
            .field("section_key", self.section.section_key())
            .finish()
    }
}

impl<T: CacheValue> CacheSectionFactory<T> {
    /// Member `name` of section `section`, both in the store's namespace.
    ///
    /// Fails with `InvalidKey` when `name` equals `section`: the member's
    /// value and the section index would share one key.
    pub fn new(
        store: &CacheStore,
        name: impl Into<String>,
        section: impl Into<String>,
    ) -> UtilKitsResult<Self> {
        let key = store.key(name);
        let section_key = store.key(section);
        if key == section_key {
            return Err(CacheError::InvalidKey {
                key: key.encode(),
                reason: "a section member cannot use the section's own key".to_string(),
            }
            .into());
        }
        Ok(Self::from_keys(store, key, section_key))
    }

    /// Member `key` of the section at `section_key`; the keys must differ.
    pub(crate) fn from_keys(store: &CacheStore, key: ScopedKey, section_key: ScopedKey) -> Self {
        let section = Arc::new(SectionDependents::new(store, section_key));
        let factory = CacheFactory::with_key(store, key)
            .with_dependents(Arc::clone(&section) as Arc<dyn CacheDependents>);
        Self { factory, section }
    }

    pub fn with_expiration(mut self, expiration: Expiration) -> Self {
        self.factory = self.factory.with_expiration(expiration);
        self
    }

    pub fn with_populate_on_miss<F>(mut self, populate: F) -> Self
    where
        F: Fn() -> UtilKitsResult<Option<T>> + Send + Sync + 'static,
    {
        self.factory = self.factory.with_populate_on_miss(populate);
        self
    }

    pub fn key(&self) -> &ScopedKey {
        self.factory.key()
    }

    pub fn section_key(&self) -> &ScopedKey {
        self.section.section_key()
    }

    /// Keys currently recorded in this member's section.
    pub fn members(&self) -> UtilKitsResult<Vec<ScopedKey>> {
        self.section.members()
    }

    pub fn exists(&self) -> UtilKitsResult<bool> {
        self.factory.exists()
    }

    pub fn get(&self) -> UtilKitsResult<Option<T>> {
        self.factory.get()
    }

    pub fn get_with<F, V>(&self, populate: F) -> UtilKitsResult<Option<T>>
    where
        F: FnOnce() -> V,
        V: Into<Option<T>>,
    {
        self.factory.get_with(populate)
    }

    pub fn try_get_with<F, V, E>(&self, populate: F) -> Result<Option<T>, E>
    where
        F: FnOnce() -> Result<V, E>,
        V: Into<Option<T>>,
        E: From<utilkits_core::UtilKitsError>,
    {
        self.factory.try_get_with(populate)
    }

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
        self.factory.get_with_refresh(populate, should_refresh)
    }

    pub fn read<F, V>(&self, populate: F) -> UtilKitsResult<Option<CacheRead<T>>>
    where
        F: FnOnce() -> V,
        V: Into<Option<T>>,
    {
        self.factory.read(populate)
    }

    pub fn get_cache_time(&self) -> UtilKitsResult<Option<Timestamp>> {
        self.factory.get_cache_time()
    }

    pub fn is_older_than(&self, max_age: Duration) -> UtilKitsResult<bool> {
        self.factory.is_older_than(max_age)
    }

    /// Store the value and record this key in the section.
    pub fn set(&self, value: impl Into<Option<T>>) -> UtilKitsResult<()> {
        self.factory.set(value)
    }

    /// Remove this value and every other member of the section.
    pub fn delete(&self) -> UtilKitsResult<()> {
        self.factory.delete()
    }

    pub fn delete_without_cascade(&self) -> UtilKitsResult<()> {
        self.factory.delete_without_cascade()
    }

    /// Record an extra key that should go with this section.
    pub(crate) fn append(&self, key: &ScopedKey) -> UtilKitsResult<()> {
        self.section.append(key)
    }

    pub(crate) fn peek(&self) -> UtilKitsResult<Option<T>> {
        self.factory.peek()
    }
}

impl<T: CacheValue> AsRef<CacheFactory<T>> for CacheSectionFactory<T> {
    fn as_ref(&self) -> &CacheFactory<T> {
        &self.factory
    }
}

impl<T: CacheValue> CacheTimed for CacheSectionFactory<T> {
    fn get_cache_time(&self) -> UtilKitsResult<Option<Timestamp>> {
        self.factory.get_cache_time()
    }
}
