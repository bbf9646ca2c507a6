//! Key-value cache collaborator
//!
//! The engine stores every retrieved item under three independent keys:
//! `<id>.raw`, `<id>.meta` and `<id>.parsed`. Nothing here is ever evicted.
//! Each retriever gets its own namespace from a [`CacheBackend`], so
//! identifiers never collide across retrievers.

mod file;
mod memory;

pub use file::{FileCache, FileCacheBackend};
pub use memory::{MemoryCache, MemoryCacheBackend};

use crate::error::CacheError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Storage for byte blobs keyed by string
///
/// No atomicity across keys is assumed. Concurrent writes to different keys
/// must be safe; concurrent writes to one key are last-writer-wins.
pub trait KeyValueCache: Send + Sync {
    /// Returns true if `key` is stored
    fn has(&self, key: &str) -> bool;

    /// Load the value for `key`, `None` if absent
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Store `value` under `key`, replacing any previous value
    fn save(&self, key: &str, value: &[u8]) -> Result<(), CacheError>;

    /// All keys in this namespace
    fn list(&self) -> Result<BTreeSet<String>, CacheError>;
}

/// Hands out one isolated [`KeyValueCache`] per retriever
pub trait CacheBackend: Send + Sync {
    /// Open (creating if needed) the namespace `name`
    fn namespace(&self, name: &str) -> Result<Arc<dyn KeyValueCache>, CacheError>;
}

/// One of the three parts of a cache entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSlot {
    /// Unmodified fetched content
    Raw,
    /// [`CacheMeta`] record as JSON
    Meta,
    /// Parser output
    Parsed,
}

impl CacheSlot {
    /// Key suffix including the dot
    pub fn suffix(self) -> &'static str {
        match self {
            CacheSlot::Raw => ".raw",
            CacheSlot::Meta => ".meta",
            CacheSlot::Parsed => ".parsed",
        }
    }

    /// Cache key of this slot for `id`
    pub fn key(self, id: &str) -> String {
        format!("{id}{}", self.suffix())
    }
}

/// Metadata slot of a cache entry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheMeta {
    /// The URL that was requested
    pub url: String,

    /// Final URL, present only when it differs from `url`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,

    /// Transport metadata (last-modified, content-type, title, ...)
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl CacheMeta {
    /// The URL the raw content was actually served from
    pub fn effective_url(&self) -> &str {
        self.redirect_url.as_deref().unwrap_or(&self.url)
    }

    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        // Serializing a struct of strings and JSON values cannot fail.
        serde_json::to_vec_pretty(self).unwrap_or_default()
    }

    pub(crate) fn from_bytes(key: &str, bytes: &[u8]) -> Result<Self, CacheError> {
        serde_json::from_slice(bytes).map_err(|e| CacheError::Corrupt {
            key: key.to_string(),
            message: e.to_string(),
        })
    }
}

/// Reject keys that could address something outside the namespace
pub(crate) fn validate_key(key: &str) -> Result<(), CacheError> {
    if key.is_empty()
        || key.starts_with('.')
        || key.contains('/')
        || key.contains('\\')
        || key.contains('\0')
    {
        return Err(CacheError::InvalidKey(key.to_string()));
    }
    Ok(())
}
