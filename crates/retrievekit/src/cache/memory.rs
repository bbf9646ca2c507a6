//! In-process cache, used by tests and short-lived tools

use super::{validate_key, CacheBackend, KeyValueCache};
use crate::error::CacheError;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

/// One in-memory namespace
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every stored entry
    pub fn snapshot(&self) -> BTreeMap<String, Vec<u8>> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Stored value as UTF-8 text
    pub fn text(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .map(|v| String::from_utf8_lossy(v).into_owned())
    }
}

impl KeyValueCache for MemoryCache {
    fn has(&self, key: &str) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned())
    }

    fn save(&self, key: &str, value: &[u8]) -> Result<(), CacheError> {
        validate_key(key)?;
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn list(&self) -> Result<BTreeSet<String>, CacheError> {
        Ok(self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect())
    }
}

/// Hands out one shared [`MemoryCache`] per namespace name
#[derive(Debug, Default)]
pub struct MemoryCacheBackend {
    namespaces: Mutex<HashMap<String, Arc<MemoryCache>>>,
}

impl MemoryCacheBackend {
    /// Create an empty backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Concrete handle to a namespace, for inspection in tests
    pub fn cache(&self, name: &str) -> Arc<MemoryCache> {
        self.namespaces
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(name.to_string())
            .or_default()
            .clone()
    }
}

impl CacheBackend for MemoryCacheBackend {
    fn namespace(&self, name: &str) -> Result<Arc<dyn KeyValueCache>, CacheError> {
        validate_key(name)?;
        Ok(self.cache(name))
    }
}
