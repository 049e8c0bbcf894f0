//! UtilKits Core - Shared Types
//!
//! Error taxonomy, cache settings, and the clock abstraction used by the
//! cache layer. No caching behaviour lives here.

use chrono::{DateTime, Utc};

pub mod clock;
pub mod config;
pub mod error;

pub use clock::{system_clock, Clock, ManualClock, SharedClock, SystemClock};
pub use config::{BackendKind, CacheSettings};
pub use error::{CacheError, ConfigError, SerializationError, UtilKitsError, UtilKitsResult};

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;
