//! Error types for UtilKits cache operations

use thiserror::Error;

/// Cache backend errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Backend {backend} unavailable: {reason}")]
    BackendUnavailable { backend: String, reason: String },

    #[error("Backend operation failed: {reason}")]
    Backend { reason: String },

    #[error("Slot {key} holds a value that is not a {expected}")]
    TypeMismatch { key: String, expected: &'static str },

    #[error("Invalid cache key {key}: {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("Cache lock poisoned")]
    LockPoisoned,
}

/// Value encoding errors for backends that marshal values to bytes.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SerializationError {
    #[error("Failed to encode value: {reason}")]
    Encode { reason: String },

    #[error("Failed to decode value: {reason}")]
    Decode { reason: String },

    #[error("Unsupported record version {found}, expected {expected}")]
    UnsupportedVersion { found: u8, expected: u8 },

    #[error("Record truncated: {len} bytes")]
    Truncated { len: usize },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all UtilKits errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UtilKitsError {
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl UtilKitsError {
    /// True when the failure came from an unreachable backend.
    pub fn is_backend_unavailable(&self) -> bool {
        matches!(self, Self::Cache(CacheError::BackendUnavailable { .. }))
    }
}

/// Result type alias for UtilKits operations.
pub type UtilKitsResult<T> = Result<T, UtilKitsError>;

// =============================================================================
// TESTS
// =============================================================================
