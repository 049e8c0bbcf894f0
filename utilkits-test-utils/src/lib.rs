//! UtilKits Test Utilities
//!
//! Shared test infrastructure for the UtilKits workspace:
//! - Proptest generators for keys and cached values
//! - Fixtures: isolated stores on a manual clock, sample rows
//! - Custom assertions for cache-specific checks

use std::sync::{Arc, Once};

pub use utilkits_cache::{
    CacheFactory, CacheNamespace, CachePageFactory, CacheSectionFactory, CacheStore, MemoryTable,
    Page, ScopedKey,
};
pub use utilkits_core::{CacheError, Clock, ManualClock, Timestamp, UtilKitsError, UtilKitsResult};

static INIT_TRACING: Once = Once::new();

/// Install a test-friendly tracing subscriber once per process.
///
/// Filter with `RUST_LOG`, e.g. `RUST_LOG=utilkits_cache=debug`.
pub fn init_test_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for cache keys and values.

    use super::*;
    use proptest::prelude::*;

    /// Generate a valid namespace name.
    pub fn arb_namespace() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_-]{0,15}"
    }

    /// Generate a key name, separators allowed.
    pub fn arb_key_name() -> impl Strategy<Value = String> {
        "[a-zA-Z0-9_:.-]{1,32}"
    }

    /// Generate a dataset base name suitable for page keys.
    pub fn arb_base_name() -> impl Strategy<Value = String> {
        "[a-z]{1,12}"
    }

    /// Generate a (page_index, page_size) pair.
    pub fn arb_page_coords() -> impl Strategy<Value = (u32, u32)> {
        (0u32..50, 1u32..200)
    }

    /// Generate a Timestamp within 2020-2030.
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (1577836800i64..1893456000i64).prop_map(|secs| {
            chrono::DateTime::from_timestamp(secs, 0).unwrap_or_else(chrono::Utc::now)
        })
    }

    /// Generate an order row.
    pub fn arb_order_row() -> impl Strategy<Value = fixtures::OrderRow> {
        (any::<u64>(), "[a-z ]{0,24}", 0u32..100_000).prop_map(|(id, customer, cents)| {
            fixtures::OrderRow {
                id,
                customer,
                amount_cents: cents,
            }
        })
    }

    /// Generate one page worth of order rows.
    pub fn arb_order_page(max_rows: usize) -> impl Strategy<Value = Vec<fixtures::OrderRow>> {
        proptest::collection::vec(arb_order_row(), 0..=max_rows)
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures for common cache scenarios.

    use super::*;
    use serde::{Deserialize, Serialize};

    /// A row of a paginated dataset.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct OrderRow {
        pub id: u64,
        pub customer: String,
        pub amount_cents: u32,
    }

    /// A store over its own memory table, driven by a manual clock.
    ///
    /// Nothing else shares the table, so tests can count entries and
    /// control expiration exactly.
    pub struct IsolatedStore {
        pub store: CacheStore,
        pub table: MemoryTable,
        pub clock: ManualClock,
    }

    /// Create an isolated store in namespace `namespace`.
    #[track_caller]
    pub fn isolated_store(namespace: &str) -> IsolatedStore {
        let clock = ManualClock::starting_now();
        let table = MemoryTable::with_clock(Arc::new(clock.clone()));
        let store = CacheStore::with_table(namespace, table.clone())
            .expect("fixture namespace should be valid");
        IsolatedStore {
            store,
            table,
            clock,
        }
    }

    /// `count` order rows starting at id `first_id`.
    pub fn order_rows(first_id: u64, count: usize) -> Vec<OrderRow> {
        (0..count as u64)
            .map(|offset| OrderRow {
                id: first_id + offset,
                customer: format!("customer-{}", (first_id + offset) % 7),
                amount_cents: ((first_id + offset) * 125 % 10_000) as u32,
            })
            .collect()
    }

    /// Rows of page `page_index` out of `total` rows, `page_size` per page.
    pub fn order_page(total: u64, page_index: u32, page_size: u32) -> Vec<OrderRow> {
        let start = u64::from(page_index) * u64::from(page_size);
        let end = (start + u64::from(page_size)).min(total);
        if start >= end {
            return Vec::new();
        }
        order_rows(start, (end - start) as usize)
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for cache-specific checks.

    use super::*;

    /// Assert that a cache wrapper reports no stored value.
    #[track_caller]
    pub fn assert_absent(exists: UtilKitsResult<bool>) {
        match exists {
            Ok(false) => {}
            other => panic!("Expected no cached value, got: {:?}", other),
        }
    }

    /// Assert that a cache wrapper reports a stored value.
    #[track_caller]
    pub fn assert_present(exists: UtilKitsResult<bool>) {
        match exists {
            Ok(true) => {}
            other => panic!("Expected a cached value, got: {:?}", other),
        }
    }

    /// Assert that a result failed because the backend is unreachable.
    #[track_caller]
    pub fn assert_backend_unavailable<T: std::fmt::Debug>(result: &UtilKitsResult<T>) {
        match result {
            Err(UtilKitsError::Cache(CacheError::BackendUnavailable { .. })) => {}
            other => panic!("Expected BackendUnavailable error, got: {:?}", other),
        }
    }

    /// Assert that the names (without namespace) of `keys` equal `expected`.
    #[track_caller]
    pub fn assert_key_names(keys: &[ScopedKey], expected: &[&str]) {
        let names: Vec<&str> = keys.iter().map(ScopedKey::name).collect();
        assert_eq!(names, expected, "Unexpected key names");
    }
}

// ============================================================================
// TESTS
// ============================================================================
