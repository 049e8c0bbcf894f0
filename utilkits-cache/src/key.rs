//! Namespaced cache keys.
//!
//! A `ScopedKey` can only be obtained from a `CacheNamespace`, so every key
//! that reaches a storage backend carries a dataset prefix. Two unrelated
//! datasets sharing the process-wide memory table cannot collide unless
//! they deliberately pick the same namespace.

use std::fmt;
use std::sync::Arc;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use utilkits_core::CacheError;

/// Separator between namespace and key name in the encoded form.
pub const SEPARATOR: char = ':';

/// Suffix appended to a section name to address its total-count entry.
pub const TOTAL_SUFFIX: &str = "_Total";

/// A validated key prefix.
///
/// Namespaces are non-empty and never contain [`SEPARATOR`], which makes
/// the encoded `namespace:name` form unambiguous to split.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheNamespace(Arc<str>);

impl CacheNamespace {
    pub fn new(name: impl AsRef<str>) -> Result<Self, CacheError> {
        let name = name.as_ref();
        if name.is_empty() {
            return Err(CacheError::InvalidKey {
                key: name.to_string(),
                reason: "namespace must not be empty".to_string(),
            });
        }
        if name.contains(SEPARATOR) {
            return Err(CacheError::InvalidKey {
                key: name.to_string(),
                reason: format!("namespace must not contain '{}'", SEPARATOR),
            });
        }
        Ok(Self(Arc::from(name)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Build a key inside this namespace.
    pub fn key(&self, name: impl Into<String>) -> ScopedKey {
        ScopedKey {
            inner: ScopedKeyInner {
                namespace: self.clone(),
                name: name.into(),
            },
        }
    }

    /// Derive the page, section, and total keys for one page of a dataset.
    pub fn page_keys(&self, base: &str, page_index: u32, page_size: u32) -> PageKeys {
        let section_name = section_name(base, page_size);
        PageKeys {
            page: self.key(page_name(base, page_index, page_size)),
            total: self.key(total_name(&section_name)),
            section: self.key(section_name),
        }
    }
}

impl fmt::Display for CacheNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A cache key bound to a namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopedKey {
    inner: ScopedKeyInner,
}

/// Private inner struct - prevents construction without a namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ScopedKeyInner {
    namespace: CacheNamespace,
    name: String,
}

impl ScopedKey {
    pub fn namespace(&self) -> &CacheNamespace {
        &self.inner.namespace
    }

    /// The key name without its namespace.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Encode as `namespace:name`, the form handed to backends.
    pub fn encode(&self) -> String {
        let mut encoded =
            String::with_capacity(self.inner.namespace.0.len() + 1 + self.inner.name.len());
        encoded.push_str(&self.inner.namespace.0);
        encoded.push(SEPARATOR);
        encoded.push_str(&self.inner.name);
        encoded
    }

    /// Decode from `namespace:name`.
    ///
    /// Returns `None` if the separator is missing or the namespace part is
    /// invalid. The name part may itself contain separators.
    pub fn decode(encoded: &str) -> Option<Self> {
        let (namespace, name) = encoded.split_once(SEPARATOR)?;
        let namespace = CacheNamespace::new(namespace).ok()?;
        Some(namespace.key(name))
    }
}

impl fmt::Display for ScopedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.inner.namespace, SEPARATOR, self.inner.name)
    }
}

impl Serialize for ScopedKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.encode())
    }
}

impl<'de> Deserialize<'de> for ScopedKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        ScopedKey::decode(&encoded)
            .ok_or_else(|| de::Error::custom(format!("invalid scoped key: {}", encoded)))
    }
}

// ============================================================================
// PAGE KEY DERIVATION
// ============================================================================

/// `{base}_S{page_size}_P{page_index}`
pub fn page_name(base: &str, page_index: u32, page_size: u32) -> String {
    format!("{}_S{}_P{}", base, page_size, page_index)
}

/// `{base}_S{page_size}`
pub fn section_name(base: &str, page_size: u32) -> String {
    format!("{}_S{}", base, page_size)
}

/// `{section}_Total`
pub fn total_name(section: &str) -> String {
    format!("{}{}", section, TOTAL_SUFFIX)
}

/// The three keys one page of a paginated dataset touches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageKeys {
    pub page: ScopedKey,
    pub section: ScopedKey,
    pub total: ScopedKey,
}
