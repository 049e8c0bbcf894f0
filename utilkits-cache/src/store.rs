//! Backend selection and the builder every cache wrapper starts from.
//!
//! A `CacheStore` is configured once (namespace, backend, clock, default
//! expiration) and hands that configuration to each wrapper it builds.

use std::fmt;
use std::sync::Arc;
#[cfg(feature = "redis")]
use std::time::Duration;

use utilkits_core::{BackendKind, CacheSettings, SharedClock, UtilKitsResult};

use super::factory::CacheFactory;
use super::flight::FlightRegistry;
use super::key::{CacheNamespace, ScopedKey};
use super::memory::MemoryTable;
use super::page::CachePageFactory;
#[cfg(feature = "redis")]
use super::redis_backend::{RedisConnection, RedisStorage};
use super::section::CacheSectionFactory;
use super::traits::{CacheStats, CacheStorage, CacheValue, Expiration};

#[derive(Clone)]
enum Backend {
    Memory(MemoryTable),
    #[cfg(feature = "redis")]
    Redis(Arc<RedisConnection>),
}

/// Namespace, backend, and defaults shared by a family of cache wrappers.
#[derive(Clone)]
pub struct CacheStore {
    namespace: CacheNamespace,
    backend: Backend,
    clock: SharedClock,
    default_expiration: Option<Expiration>,
    flights: Arc<FlightRegistry>,
}

impl fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheStore")
            .field("namespace", &self.namespace)
            .field("backend", &self.backend_name())
            .field("default_expiration", &self.default_expiration)
            .finish()
    }
}

impl CacheStore {
    /// A store over the process-wide memory table.
    pub fn memory(namespace: &str) -> UtilKitsResult<Self> {
        Self::with_table(namespace, MemoryTable::global())
    }

    /// A store over the given memory table, using the table's clock.
    pub fn with_table(namespace: &str, table: MemoryTable) -> UtilKitsResult<Self> {
        Ok(Self {
            namespace: CacheNamespace::new(namespace)?,
            clock: table.clock(),
            backend: Backend::Memory(table),
            default_expiration: None,
            flights: Arc::new(FlightRegistry::new()),
        })
    }

    /// A store over a Redis server.
    ///
    /// Fails with `BackendUnavailable` if the server cannot be reached.
    #[cfg(feature = "redis")]
    pub fn redis(namespace: &str, url: &str, connect_timeout: Duration) -> UtilKitsResult<Self> {
        let namespace = CacheNamespace::new(namespace)?;
        let connection = RedisConnection::connect(url, connect_timeout)?;
        Ok(Self {
            namespace,
            backend: Backend::Redis(Arc::new(connection)),
            clock: utilkits_core::system_clock(),
            default_expiration: None,
            flights: Arc::new(FlightRegistry::new()),
        })
    }

    /// Build a store from validated settings.
    ///
    /// A memory backend uses the process-wide table, and `scan_frequency`
    /// is applied to that table, so it changes the sweep interval seen by
    /// every other store on it. Use [`CacheStore::from_settings_with_table`]
    /// to keep the setting local.
    pub fn from_settings(settings: &CacheSettings) -> UtilKitsResult<Self> {
        Self::from_settings_with_table(settings, MemoryTable::global())
    }

    /// Build a store from validated settings, using `table` when the
    /// backend is memory. The table is ignored for Redis.
    pub fn from_settings_with_table(
        settings: &CacheSettings,
        table: MemoryTable,
    ) -> UtilKitsResult<Self> {
        settings.validate()?;

        let store = match settings.backend {
            BackendKind::Memory => {
                table.set_scan_frequency(settings.scan_frequency);
                Self::with_table(&settings.namespace, table)?
            }
            BackendKind::Redis => Self::redis_from_settings(settings)?,
        };

        Ok(match settings.default_expiration {
            Some(window) => store.with_default_expiration(Expiration::Sliding(window)),
            None => store,
        })
    }

    #[cfg(feature = "redis")]
    fn redis_from_settings(settings: &CacheSettings) -> UtilKitsResult<Self> {
        let url = settings.redis_url.as_deref().ok_or_else(|| {
            utilkits_core::ConfigError::MissingRequired {
                field: "redis_url".to_string(),
            }
        })?;
        Self::redis(&settings.namespace, url, settings.connect_timeout)
    }

    #[cfg(not(feature = "redis"))]
    fn redis_from_settings(_settings: &CacheSettings) -> UtilKitsResult<Self> {
        Err(utilkits_core::ConfigError::InvalidValue {
            field: "backend".to_string(),
            value: BackendKind::Redis.to_string(),
            reason: "built without the redis feature".to_string(),
        }
        .into())
    }

    /// Expiration inherited by every wrapper built afterwards.
    pub fn with_default_expiration(mut self, expiration: Expiration) -> Self {
        self.default_expiration = Some(expiration);
        self
    }

    pub fn namespace(&self) -> &CacheNamespace {
        &self.namespace
    }

    pub fn clock(&self) -> SharedClock {
        Arc::clone(&self.clock)
    }

    pub fn default_expiration(&self) -> Option<Expiration> {
        self.default_expiration
    }

    /// A key in this store's namespace.
    pub fn key(&self, name: impl Into<String>) -> ScopedKey {
        self.namespace.key(name)
    }

    pub fn backend_name(&self) -> &'static str {
        match &self.backend {
            Backend::Memory(_) => "memory",
            #[cfg(feature = "redis")]
            Backend::Redis(_) => "redis",
        }
    }

    /// A typed view over this store's backend.
    pub fn storage<V: CacheValue>(&self) -> Arc<dyn CacheStorage<V>> {
        match &self.backend {
            Backend::Memory(table) => Arc::new(table.storage::<V>()),
            #[cfg(feature = "redis")]
            Backend::Redis(connection) => Arc::new(
                RedisStorage::<V>::new(Arc::clone(connection)).with_clock(self.clock()),
            ),
        }
    }

    /// Probe the backend.
    pub fn is_connected(&self) -> bool {
        match &self.backend {
            Backend::Memory(_) => true,
            #[cfg(feature = "redis")]
            Backend::Redis(connection) => connection.is_connected(),
        }
    }

    /// Backend-wide statistics.
    pub fn stats(&self) -> CacheStats {
        match &self.backend {
            Backend::Memory(table) => table.stats(),
            #[cfg(feature = "redis")]
            Backend::Redis(connection) => connection.stats(),
        }
    }

    pub(crate) fn flights(&self) -> Arc<FlightRegistry> {
        Arc::clone(&self.flights)
    }

    // ------------------------------------------------------------------------
    // Wrapper builders
    // ------------------------------------------------------------------------

    /// A standalone single-entry cache.
    pub fn single<T: CacheValue>(&self, name: impl Into<String>) -> CacheFactory<T> {
        CacheFactory::new(self, name)
    }

    /// A member of the section named `section`.
    ///
    /// Fails when `name` equals `section`.
    pub fn section<T: CacheValue>(
        &self,
        name: impl Into<String>,
        section: impl Into<String>,
    ) -> UtilKitsResult<CacheSectionFactory<T>> {
        CacheSectionFactory::new(self, name, section)
    }

    /// Page `page_index` of the dataset `base`, `page_size` rows per page.
    pub fn page<T: CacheValue>(
        &self,
        base: &str,
        page_index: u32,
        page_size: u32,
    ) -> CachePageFactory<T> {
        CachePageFactory::new(self, base, page_index, page_size)
    }
}
