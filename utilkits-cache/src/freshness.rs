//! Freshness of cached values.
//!
//! Two caches that know nothing about each other can still be ordered by
//! the instant each was last written. [`over_dependency_time`] uses that to
//! let a cache of derived data refresh whenever its source was rewritten
//! more recently, with no signalling channel between the two.

use std::time::Duration;

use utilkits_core::{Timestamp, UtilKitsResult};

/// Anything that can report when its value was last written.
pub trait CacheTimed {
    /// `None` when nothing is cached.
    fn get_cache_time(&self) -> UtilKitsResult<Option<Timestamp>>;
}

/// True iff both caches hold a value and `target` was written strictly
/// after `source`.
///
/// Pass it as the refresh predicate of the derived cache:
///
/// ```ignore
/// let summary = derived.get_with_refresh(build_summary, || {
///     over_dependency_time(&derived, &orders)
/// })?;
/// ```
pub fn over_dependency_time<S, U>(source: &S, target: &U) -> UtilKitsResult<bool>
where
    S: CacheTimed + ?Sized,
    U: CacheTimed + ?Sized,
{
    let Some(target_time) = target.get_cache_time()? else {
        return Ok(false);
    };
    let Some(source_time) = source.get_cache_time()? else {
        return Ok(false);
    };
    Ok(target_time > source_time)
}

/// Result of a cache read, carrying when the value was written.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRead<T> {
    /// The cached value.
    value: T,
    /// When this value was written to the cache.
    cached_at: Timestamp,
    /// Whether this was a cache hit or miss.
    was_cache_hit: bool,
}

impl<T> CacheRead<T> {
    /// A value that was already cached.
    pub fn from_cache(value: T, cached_at: Timestamp) -> Self {
        Self {
            value,
            cached_at,
            was_cache_hit: true,
        }
    }

    /// A value this read had to populate.
    pub fn from_populate(value: T, cached_at: Timestamp) -> Self {
        Self {
            value,
            cached_at,
            was_cache_hit: false,
        }
    }

    /// Consume the wrapper and return the underlying value.
    pub fn into_value(self) -> T {
        self.value
    }

    /// Get a reference to the underlying value.
    pub fn value(&self) -> &T {
        &self.value
    }

    /// Check if the data is fresh as of the given timestamp.
    ///
    /// Returns true if the data was cached at or after the specified time.
    pub fn is_fresh_as_of(&self, timestamp: Timestamp) -> bool {
        self.cached_at >= timestamp
    }

    /// Age of the value at `now`; zero if `now` is before the write.
    pub fn staleness(&self, now: Timestamp) -> Duration {
        (now - self.cached_at).to_std().unwrap_or(Duration::ZERO)
    }

    /// Get when this value was cached.
    pub fn cached_at(&self) -> Timestamp {
        self.cached_at
    }

    /// Check if this was a cache hit.
    pub fn was_cache_hit(&self) -> bool {
        self.was_cache_hit
    }

    /// Check if this read populated the cache.
    pub fn was_cache_miss(&self) -> bool {
        !self.was_cache_hit
    }

    /// Map the inner value to a new type.
    pub fn map<U, F>(self, f: F) -> CacheRead<U>
    where
        F: FnOnce(T) -> U,
    {
        CacheRead {
            value: f(self.value),
            cached_at: self.cached_at,
            was_cache_hit: self.was_cache_hit,
        }
    }
}

impl<T> AsRef<T> for CacheRead<T> {
    fn as_ref(&self) -> &T {
        &self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    struct Fixed(Option<Timestamp>);

    impl CacheTimed for Fixed {
        fn get_cache_time(&self) -> UtilKitsResult<Option<Timestamp>> {
            Ok(self.0)
        }
    }

    #[test]
    fn test_over_dependency_time_requires_both() {
        let now = Utc::now();
        let pairs = [
            (Fixed(None), Fixed(None)),
            (Fixed(Some(now)), Fixed(None)),
            (Fixed(None), Fixed(Some(now))),
        ];
        for (source, target) in &pairs {
            assert!(!over_dependency_time(source, target).expect("check should succeed"));
        }
    }

    #[test]
    fn test_over_dependency_time_is_strict() {
        let earlier = Utc::now();
        let later = earlier + chrono::Duration::milliseconds(1);

        assert!(over_dependency_time(&Fixed(Some(earlier)), &Fixed(Some(later)))
            .expect("check should succeed"));
        assert!(!over_dependency_time(&Fixed(Some(later)), &Fixed(Some(earlier)))
            .expect("check should succeed"));
        assert!(!over_dependency_time(&Fixed(Some(earlier)), &Fixed(Some(earlier)))
            .expect("check should succeed"));
    }

    #[test]
    fn test_cache_read_from_cache() {
        let now = Utc::now();
        let read = CacheRead::from_cache("value".to_string(), now);

        assert!(read.was_cache_hit());
        assert!(!read.was_cache_miss());
        assert_eq!(read.value(), "value");
        assert_eq!(read.cached_at(), now);
    }

    #[test]
    fn test_cache_read_from_populate() {
        let read = CacheRead::from_populate(42, Utc::now());
        assert!(read.was_cache_miss());
        assert_eq!(read.into_value(), 42);
    }

    #[test]
    fn test_cache_read_staleness() {
        let cached_at = Utc::now();
        let read = CacheRead::from_cache(1, cached_at);

        let later = cached_at + chrono::Duration::seconds(90);
        assert_eq!(read.staleness(later), Duration::from_secs(90));

        let earlier = cached_at - chrono::Duration::seconds(5);
        assert_eq!(read.staleness(earlier), Duration::ZERO);
    }

    #[test]
    fn test_cache_read_is_fresh_as_of() {
        let now = Utc::now();
        let read = CacheRead::from_cache(1, now);

        assert!(read.is_fresh_as_of(now));
        assert!(read.is_fresh_as_of(now - chrono::Duration::seconds(10)));
        assert!(!read.is_fresh_as_of(now + chrono::Duration::seconds(10)));
    }

    #[test]
    fn test_cache_read_map() {
        let now = Utc::now();
        let read = CacheRead::from_cache(21, now);
        let mapped = read.map(|v| v * 2);

        assert_eq!(*mapped.value(), 42);
        assert!(mapped.was_cache_hit());
        assert_eq!(mapped.cached_at(), now);
    }
}
