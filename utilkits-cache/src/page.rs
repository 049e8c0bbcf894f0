//! Paginated query results.
//!
//! One page of a dataset is a section member keyed by base name, page size
//! and page index. Every page of the same size shares a section with the
//! dataset's total row count, so invalidating any page (or the expiry of
//! any page) drops the whole paginated result set, total included.
//!
//! The total is stored as a bare count without expiration; it lives and
//! dies with the section.

use std::fmt;
use std::sync::Arc;

use tracing::debug;
use utilkits_core::{Timestamp, UtilKitsError, UtilKitsResult};

use super::factory::CacheFactory;
use super::flight::FlightRegistry;
use super::freshness::CacheTimed;
use super::key::PageKeys;
use super::section::CacheSectionFactory;
use super::store::CacheStore;
use super::traits::{CacheStorage, CacheValue, Expiration};

/// One page of data with the dataset's total row count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    /// Rows across all pages; 0 if the total is not cached.
    pub total: u64,
    /// This page's rows; `None` if the populate callback produced nothing.
    pub data: Option<T>,
}

/// Cache wrapper for one page of a paginated dataset.
pub struct CachePageFactory<T: CacheValue> {
    section: CacheSectionFactory<T>,
    totals: Arc<dyn CacheStorage<u64>>,
    keys: PageKeys,
    flights: Arc<FlightRegistry>,
}

impl<T: CacheValue> fmt::Debug for CachePageFactory<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachePageFactory")
            .field("keys", &self.keys)
            .finish()
    }
}

impl<T: CacheValue> Clone for CachePageFactory<T> {
    fn clone(&self) -> Self {
        Self {
            section: self.section.clone(),
            totals: Arc::clone(&self.totals),
            keys: self.keys.clone(),
            flights: Arc::clone(&self.flights),
        }
    }
}

impl<T: CacheValue> CachePageFactory<T> {
    /// Page `page_index` of `base`, `page_size` rows per page.
    pub fn new(store: &CacheStore, base: &str, page_index: u32, page_size: u32) -> Self {
        let keys = store.namespace().page_keys(base, page_index, page_size);
        let section =
            CacheSectionFactory::from_keys(store, keys.page.clone(), keys.section.clone());
        Self {
            section,
            totals: store.storage(),
            keys,
            flights: store.flights(),
        }
    }

    pub fn with_expiration(mut self, expiration: Expiration) -> Self {
        self.section = self.section.with_expiration(expiration);
        self
    }

    pub fn keys(&self) -> &PageKeys {
        &self.keys
    }

    /// The section member holding this page's rows.
    pub fn section(&self) -> &CacheSectionFactory<T> {
        &self.section
    }

    pub fn exists(&self) -> UtilKitsResult<bool> {
        self.section.exists()
    }

    /// Read the page, calling `populate` for `(total, rows)` on a miss.
    ///
    /// On a miss the total is stored and recorded in the section before
    /// the page itself, so the section never holds a page without its
    /// total.
    pub fn get<F, V>(&self, populate: F) -> UtilKitsResult<Page<T>>
    where
        F: FnOnce() -> (u64, V),
        V: Into<Option<T>>,
    {
        self.try_get(|| Ok::<_, UtilKitsError>(populate()))
    }

    /// Like [`get`](Self::get) for a fallible populate callback.
    pub fn try_get<F, V, E>(&self, populate: F) -> Result<Page<T>, E>
    where
        F: FnOnce() -> Result<(u64, V), E>,
        V: Into<Option<T>>,
        E: From<UtilKitsError>,
    {
        if !self.section.exists()? {
            self.flights
                .run(&self.keys.page.encode(), || -> Result<(), E> {
                    if self.section.exists()? {
                        return Ok(());
                    }
                    let (total, data) = populate()?;
                    debug!(page = %self.keys.page, total, "populating cache page");

                    self.totals.set(&self.keys.total, total)?;
                    self.section.append(&self.keys.total)?;
                    self.section.set(data)?;
                    Ok(())
                })?;
        }

        let total = self.totals.get(&self.keys.total)?.unwrap_or_default();
        let data = self.section.peek()?;
        Ok(Page { total, data })
    }

    /// The cached total row count, if any.
    pub fn total(&self) -> UtilKitsResult<Option<u64>> {
        self.totals.get(&self.keys.total)
    }

    pub fn get_cache_time(&self) -> UtilKitsResult<Option<Timestamp>> {
        self.section.get_cache_time()
    }

    /// Drop this page, every other page of the same size, and the total.
    pub fn delete(&self) -> UtilKitsResult<()> {
        self.section.delete()
    }

    pub fn delete_without_cascade(&self) -> UtilKitsResult<()> {
        self.section.delete_without_cascade()
    }
}

impl<T: CacheValue> AsRef<CacheFactory<T>> for CachePageFactory<T> {
    fn as_ref(&self) -> &CacheFactory<T> {
        self.section.as_ref()
    }
}

impl<T: CacheValue> CacheTimed for CachePageFactory<T> {
    fn get_cache_time(&self) -> UtilKitsResult<Option<Timestamp>> {
        self.section.get_cache_time()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryTable;
    use std::cell::Cell;
    use std::time::Duration;
    use utilkits_core::{CacheError, ManualClock};

    fn setup() -> (CacheStore, ManualClock) {
        let clock = ManualClock::starting_now();
        let table = MemoryTable::with_clock(Arc::new(clock.clone()));
        let store = CacheStore::with_table("shop", table).expect("store should build");
        (store, clock)
    }

    fn rows(page: u32) -> Vec<u32> {
        (page * 10..page * 10 + 10).collect()
    }

    #[test]
    fn test_miss_stores_total_and_page() {
        let (store, _clock) = setup();
        let page = store.page::<Vec<u32>>("orders", 0, 10);

        let result = page.get(|| (37, rows(0))).expect("get should succeed");
        assert_eq!(result.total, 37);
        assert_eq!(result.data, Some(rows(0)));

        assert_eq!(page.keys().page.name(), "orders_S10_P0");
        assert_eq!(page.total().expect("total should succeed"), Some(37));

        let members: Vec<String> = page
            .section()
            .members()
            .expect("members should succeed")
            .iter()
            .map(|k| k.name().to_string())
            .collect();
        assert_eq!(members, vec!["orders_S10_Total", "orders_S10_P0"]);
    }

    #[test]
    fn test_hit_skips_populate() {
        let (store, _clock) = setup();
        let page = store.page::<Vec<u32>>("orders", 0, 10);
        let calls = Cell::new(0);

        for _ in 0..2 {
            let result = page
                .get(|| {
                    calls.set(calls.get() + 1);
                    (37, rows(0))
                })
                .expect("get should succeed");
            assert_eq!(result.total, 37);
        }
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_empty_page_keeps_total() {
        let (store, _clock) = setup();
        let page = store.page::<Vec<u32>>("orders", 9, 10);

        let result = page
            .get(|| (37, None::<Vec<u32>>))
            .expect("get should succeed");
        assert_eq!(result, Page { total: 37, data: None });
        assert!(!page.exists().expect("exists should succeed"));
    }

    #[test]
    fn test_delete_drops_every_page_and_total() {
        let (store, _clock) = setup();
        let pages: Vec<_> = (0..3).map(|i| store.page::<Vec<u32>>("orders", i, 10)).collect();
        for (i, page) in pages.iter().enumerate() {
            page.get(|| (37, rows(i as u32))).expect("get should succeed");
        }

        pages[0].delete().expect("delete should succeed");

        for page in &pages {
            assert!(!page.exists().expect("exists should succeed"));
        }
        assert_eq!(pages[1].total().expect("total should succeed"), None);
    }

    #[test]
    fn test_other_page_size_is_separate() {
        let (store, _clock) = setup();
        let ten = store.page::<Vec<u32>>("orders", 0, 10);
        let twenty = store.page::<Vec<u32>>("orders", 0, 20);
        ten.get(|| (37, rows(0))).expect("get should succeed");
        twenty.get(|| (37, rows(0))).expect("get should succeed");

        ten.delete().expect("delete should succeed");
        assert!(twenty.exists().expect("exists should succeed"));
        assert_eq!(twenty.total().expect("total should succeed"), Some(37));
    }

    #[test]
    fn test_page_expiry_cascades() {
        let (store, clock) = setup();
        let first = store
            .page::<Vec<u32>>("orders", 0, 10)
            .with_expiration(Expiration::Sliding(Duration::from_secs(30)));
        let second = store.page::<Vec<u32>>("orders", 1, 10);
        first.get(|| (37, rows(0))).expect("get should succeed");
        second.get(|| (37, rows(1))).expect("get should succeed");

        clock.advance(Duration::from_secs(31));
        assert!(!first.exists().expect("exists should succeed"));
        assert!(!second.exists().expect("exists should succeed"));
        assert_eq!(second.total().expect("total should succeed"), None);
    }

    #[test]
    fn test_try_get_error_stores_nothing() {
        let (store, _clock) = setup();
        let page = store.page::<Vec<u32>>("orders", 0, 10);

        let result = page.try_get(|| {
            Err::<(u64, Vec<u32>), UtilKitsError>(
                CacheError::Backend {
                    reason: "query failed".to_string(),
                }
                .into(),
            )
        });
        assert!(result.is_err());
        assert_eq!(page.total().expect("total should succeed"), None);
        assert!(page
            .section()
            .members()
            .expect("members should succeed")
            .is_empty());
    }
}
