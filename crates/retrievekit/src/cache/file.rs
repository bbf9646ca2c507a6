//! Directory-backed cache
//!
//! Layout: `<root>/<namespace>/<key>`, one file per key.

use super::{validate_key, CacheBackend, KeyValueCache};
use crate::error::CacheError;
use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// One namespace directory
#[derive(Debug, Clone)]
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    /// Open `dir`, creating it if needed
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| CacheError::Io {
            key: dir.display().to_string(),
            source,
        })?;
        Ok(Self { dir })
    }

    /// Directory holding this namespace
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &str) -> Result<PathBuf, CacheError> {
        validate_key(key)?;
        Ok(self.dir.join(key))
    }
}

impl KeyValueCache for FileCache {
    fn has(&self, key: &str) -> bool {
        self.path(key).map(|p| p.is_file()).unwrap_or(false)
    }

    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let path = self.path(key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(CacheError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }

    fn save(&self, key: &str, value: &[u8]) -> Result<(), CacheError> {
        let path = self.path(key)?;
        fs::write(&path, value).map_err(|source| CacheError::Io {
            key: key.to_string(),
            source,
        })?;
        debug!(key, bytes = value.len(), "Saved cache entry");
        Ok(())
    }

    fn list(&self) -> Result<BTreeSet<String>, CacheError> {
        let io_err = |source| CacheError::Io {
            key: self.dir.display().to_string(),
            source,
        };
        let mut keys = BTreeSet::new();
        for entry in fs::read_dir(&self.dir).map_err(io_err)? {
            let entry = entry.map_err(io_err)?;
            if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                if let Some(name) = entry.file_name().to_str() {
                    keys.insert(name.to_string());
                }
            }
        }
        Ok(keys)
    }
}

/// Root directory under which every retriever gets a subdirectory
#[derive(Debug, Clone)]
pub struct FileCacheBackend {
    root: PathBuf,
}

impl FileCacheBackend {
    /// Create a backend rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl CacheBackend for FileCacheBackend {
    fn namespace(&self, name: &str) -> Result<Arc<dyn KeyValueCache>, CacheError> {
        validate_key(name)?;
        Ok(Arc::new(FileCache::open(self.root.join(name))?))
    }
}
