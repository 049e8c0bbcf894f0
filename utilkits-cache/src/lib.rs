//! UtilKits Cache - Dependency-Aware Cache Wrappers
//!
//! Lazy-populating cache wrappers over a pluggable key/value backend, with
//! group invalidation for related entries and paginated results.
//!
//! # Wrappers
//!
//! - [`CacheFactory`]: one value behind one key
//! - [`CacheSectionFactory`]: a member of a section; deleting or expiring
//!   any member drops the whole section
//! - [`CachePageFactory`]: one page of a paginated dataset, grouped with
//!   every other page of the same size and the dataset's total row count
//!
//! [`over_dependency_time`] lets a derived cache refresh itself whenever
//! the cache it was built from holds a newer value.
//!
//! # Namespaces
//!
//! Keys are [`ScopedKey`]s and can only be built from a [`CacheNamespace`],
//! so two datasets sharing the process-wide memory table cannot collide by
//! accident.
//!
//! # Example
//!
//! ```ignore
//! let store = CacheStore::memory("shop")?;
//!
//! let page = store.page::<Vec<Order>>("orders", 0, 10);
//! let Page { total, data } = page.get(|| load_orders(0, 10))?;
//!
//! // Later: any page going away takes the others and the total with it.
//! page.delete()?;
//! ```

pub mod codec;
pub mod factory;
pub mod flight;
pub mod freshness;
pub mod key;
pub mod memory;
pub mod page;
#[cfg(feature = "redis")]
pub mod redis_backend;
pub mod section;
pub mod store;
pub mod traits;

pub use codec::{JsonSerializer, ValueSerializer, RECORD_VERSION};
pub use factory::{CacheDependents, CacheFactory, NoDependents, PopulateOnMiss};
pub use flight::FlightRegistry;
pub use freshness::{over_dependency_time, CacheRead, CacheTimed};
pub use key::{CacheNamespace, PageKeys, ScopedKey};
pub use memory::{MemoryStorage, MemoryTable};
pub use page::{CachePageFactory, Page};
#[cfg(feature = "redis")]
pub use redis_backend::{RedisCacheError, RedisConnection, RedisStorage};
pub use section::{CacheSectionFactory, SectionDependents, SectionIndex};
pub use store::CacheStore;
pub use traits::{
    CacheEntry, CacheStats, CacheStorage, CacheValue, EntryOptions, EvictionCallback, Expiration,
};
