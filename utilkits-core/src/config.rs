//! Cache configuration
//!
//! Selects the storage backend and carries the defaults every cache wrapper
//! built from a store inherits. Loaded from environment variables with
//! sensible defaults for development.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// ============================================================================
// BACKEND SELECTION
// ============================================================================

/// Which storage backend a store talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Single-process memory table.
    #[default]
    Memory,
    /// Shared Redis server.
    Redis,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory => f.write_str("memory"),
            Self::Redis => f.write_str("redis"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "local" => Ok(Self::Memory),
            "redis" | "distributed" => Ok(Self::Redis),
            other => Err(ConfigError::InvalidValue {
                field: "backend".to_string(),
                value: other.to_string(),
                reason: "expected 'memory' or 'redis'".to_string(),
            }),
        }
    }
}

// ============================================================================
// CACHE SETTINGS
// ============================================================================

/// Settings consumed once when building a cache store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Local or distributed backend.
    pub backend: BackendKind,

    /// Connection target for the distributed backend.
    /// Example: "redis://127.0.0.1:6379/0"
    pub redis_url: Option<String>,

    /// Prefix applied to every key written through the store.
    pub namespace: String,

    /// Sliding expiration applied when a wrapper sets none of its own.
    pub default_expiration: Option<Duration>,

    /// Connect timeout for the distributed backend.
    pub connect_timeout: Duration,

    /// How often the local table sweeps expired entries on access.
    pub scan_frequency: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            backend: BackendKind::Memory,
            redis_url: None,
            namespace: "default".to_string(),
            default_expiration: None,
            connect_timeout: Duration::from_millis(2000),
            scan_frequency: Duration::from_secs(60),
        }
    }
}

impl CacheSettings {
    /// Local backend settings under the given namespace.
    pub fn memory(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..Self::default()
        }
    }

    /// Distributed backend settings under the given namespace.
    pub fn redis(namespace: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            backend: BackendKind::Redis,
            redis_url: Some(url.into()),
            namespace: namespace.into(),
            ..Self::default()
        }
    }

    /// Set the default sliding expiration.
    pub fn with_default_expiration(mut self, expiration: Duration) -> Self {
        self.default_expiration = Some(expiration);
        self
    }

    /// Set the distributed backend connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the local table sweep frequency.
    pub fn with_scan_frequency(mut self, frequency: Duration) -> Self {
        self.scan_frequency = frequency;
        self
    }

    /// Create CacheSettings from environment variables.
    ///
    /// Environment variables:
    /// - `UTILKITS_CACHE_BACKEND`: "memory" or "redis" (default: memory)
    /// - `UTILKITS_REDIS_URL`: Redis connection URL (required for redis)
    /// - `UTILKITS_CACHE_NAMESPACE`: Key namespace (default: "default")
    /// - `UTILKITS_CACHE_EXPIRATION_SECS`: Default sliding expiration (default: none)
    /// - `UTILKITS_REDIS_CONNECT_TIMEOUT_MS`: Connect timeout (default: 2000)
    /// - `UTILKITS_CACHE_SCAN_FREQUENCY_SECS`: Local sweep frequency (default: 60)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build settings from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let backend = match lookup("UTILKITS_CACHE_BACKEND") {
            Some(raw) => raw.parse()?,
            None => defaults.backend,
        };

        let redis_url = lookup("UTILKITS_REDIS_URL")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let namespace = lookup("UTILKITS_CACHE_NAMESPACE")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.namespace);

        let default_expiration =
            parse_u64(&lookup, "UTILKITS_CACHE_EXPIRATION_SECS")?.map(Duration::from_secs);

        let connect_timeout = parse_u64(&lookup, "UTILKITS_REDIS_CONNECT_TIMEOUT_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.connect_timeout);

        let scan_frequency = parse_u64(&lookup, "UTILKITS_CACHE_SCAN_FREQUENCY_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.scan_frequency);

        let settings = Self {
            backend,
            redis_url,
            namespace,
            default_expiration,
            connect_timeout,
            scan_frequency,
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backend == BackendKind::Redis && self.redis_url.is_none() {
            return Err(ConfigError::MissingRequired {
                field: "redis_url".to_string(),
            });
        }

        if self.namespace.is_empty() || self.namespace.contains(':') {
            return Err(ConfigError::InvalidValue {
                field: "namespace".to_string(),
                value: self.namespace.clone(),
                reason: "must be non-empty and must not contain ':'".to_string(),
            });
        }

        if self.connect_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "connect_timeout".to_string(),
                value: "0".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        if matches!(self.default_expiration, Some(d) if d.is_zero()) {
            return Err(ConfigError::InvalidValue {
                field: "default_expiration".to_string(),
                value: "0".to_string(),
                reason: "omit the value instead of passing zero".to_string(),
            });
        }

        Ok(())
    }
}

fn parse_u64<F>(lookup: &F, name: &str) -> Result<Option<u64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                field: name.to_string(),
                value: raw.clone(),
                reason: e.to_string(),
            }),
    }
}
