//! Retriever configuration
//!
//! [`RetrieverParams`] is the loose key/value form every retriever is
//! instantiated from. [`RetrieverConfig`] holds the engine flags extracted
//! from it and never changes for the lifetime of a retriever instance.

use crate::error::RetrieveError;
use std::collections::BTreeMap;

/// Default number of concurrent fetches per batch
pub const DEFAULT_CONCURRENCY: usize = 2;

/// Key/value parameters passed to a retriever factory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetrieverParams {
    values: BTreeMap<String, String>,
}

impl RetrieverParams {
    /// Create empty parameters
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `key=value,key2=value2`
    ///
    /// Empty input yields empty parameters.
    pub fn parse_kv(input: &str) -> Result<Self, RetrieveError> {
        let mut params = Self::new();
        for pair in input.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                RetrieveError::configuration("params", format!("expected key=value, got '{pair}'"))
            })?;
            params.insert(key.trim(), value.trim());
        }
        Ok(params)
    }

    /// Set a parameter
    pub fn set(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.insert(key, value);
        self
    }

    /// Set a parameter in place
    pub fn insert(&mut self, key: impl Into<String>, value: impl ToString) {
        self.values.insert(key.into(), value.to_string());
    }

    /// Merge `other` on top of `self`
    pub fn merged(mut self, other: &RetrieverParams) -> Self {
        for (k, v) in &other.values {
            self.values.insert(k.clone(), v.clone());
        }
        self
    }

    /// Raw string value
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Raw string value that must be present
    pub fn require(&self, retriever: &str, key: &str) -> Result<&str, RetrieveError> {
        self.get(key)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| RetrieveError::configuration(retriever, format!("{key} is required")))
    }

    /// Boolean value (`true`/`1`/`yes` or `false`/`0`/`no`)
    pub fn bool(&self, retriever: &str, key: &str, default: bool) -> Result<bool, RetrieveError> {
        match self.get(key) {
            None => Ok(default),
            Some(v) => match v.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(true),
                "false" | "0" | "no" => Ok(false),
                _ => Err(RetrieveError::configuration(
                    retriever,
                    format!("{key} must be a boolean, got '{v}'"),
                )),
            },
        }
    }

    /// Non-negative float value
    pub fn f64(&self, retriever: &str, key: &str, default: f64) -> Result<f64, RetrieveError> {
        match self.get(key) {
            None => Ok(default),
            Some(v) => v
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite() && *f >= 0.0)
                .ok_or_else(|| {
                    RetrieveError::configuration(
                        retriever,
                        format!("{key} must be a non-negative number, got '{v}'"),
                    )
                }),
        }
    }

    /// Unsigned integer value
    pub fn usize(
        &self,
        retriever: &str,
        key: &str,
        default: usize,
    ) -> Result<usize, RetrieveError> {
        match self.get(key) {
            None => Ok(default),
            Some(v) => v.parse::<usize>().map_err(|_| {
                RetrieveError::configuration(
                    retriever,
                    format!("{key} must be a non-negative integer, got '{v}'"),
                )
            }),
        }
    }

    /// Iterate over all parameters in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Engine flags of one retriever instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrieverConfig {
    /// Ignore cached raw content and fetch again
    pub force_fetch: bool,
    /// Re-derive parsed text even when a parsed slot exists
    pub force_parse: bool,
    /// Write results back to the cache
    pub update_cache: bool,
    /// Parallelism bound for the fetch phase
    pub concurrency: usize,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            force_fetch: false,
            force_parse: false,
            update_cache: true,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

impl RetrieverConfig {
    /// Start from the defaults
    pub fn builder() -> RetrieverConfigBuilder {
        RetrieverConfigBuilder::default()
    }

    /// Extract the engine flags from retriever parameters
    ///
    /// `num_workers` is accepted as an alias for `concurrency`.
    pub fn from_params(retriever: &str, params: &RetrieverParams) -> Result<Self, RetrieveError> {
        let defaults = Self::default();
        let concurrency = match params.get("concurrency") {
            Some(_) => params.usize(retriever, "concurrency", defaults.concurrency)?,
            None => params.usize(retriever, "num_workers", defaults.concurrency)?,
        };
        if concurrency == 0 {
            return Err(RetrieveError::configuration(
                retriever,
                "concurrency must be at least 1",
            ));
        }

        Ok(Self {
            force_fetch: params.bool(retriever, "force_fetch", defaults.force_fetch)?,
            force_parse: params.bool(retriever, "force_parse", defaults.force_parse)?,
            update_cache: params.bool(retriever, "update_cache", defaults.update_cache)?,
            concurrency,
        })
    }
}

/// Builder for [`RetrieverConfig`]
#[derive(Debug, Clone, Default)]
pub struct RetrieverConfigBuilder {
    config: RetrieverConfig,
}

impl RetrieverConfigBuilder {
    /// Ignore cached raw content
    pub fn force_fetch(mut self, enable: bool) -> Self {
        self.config.force_fetch = enable;
        self
    }

    /// Always re-derive parsed text
    pub fn force_parse(mut self, enable: bool) -> Self {
        self.config.force_parse = enable;
        self
    }

    /// Write results back to the cache
    pub fn update_cache(mut self, enable: bool) -> Self {
        self.config.update_cache = enable;
        self
    }

    /// Parallelism bound, clamped to at least 1
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.config.concurrency = concurrency.max(1);
        self
    }

    /// Build the config
    pub fn build(self) -> RetrieverConfig {
        self.config
    }
}
