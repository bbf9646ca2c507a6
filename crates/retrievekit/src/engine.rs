//! Retrieval engine
//!
//! Resolves inputs to identifiers, serves what the cache already has,
//! sends the misses through the retriever's fetch strategy, parses, and
//! writes the three cache slots back.
//!
//! Per item the flow is:
//!
//! ```text
//! resolve -> raw cached?  -- yes, parsed cached -> return parsed
//!                         -- yes, no parsed     -> reparse raw
//!                         -- no / force_fetch   -> fetch -> parse -> store
//! ```
//!
//! Only resolution failures and cache reads are returned as `Err`. Fetch
//! and parse failures become `None` in that item's position, and a failed
//! cache write after a fetch is logged.

use crate::cache::{CacheMeta, CacheSlot, KeyValueCache};
use crate::clock::Clock;
use crate::config::RetrieverConfig;
use crate::error::{CacheError, ParseError, RetrieveError};
use crate::fetch::FetchOutcome;
use crate::identifier::looks_like_url;
use crate::retriever::Retriever;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use url::Url;

/// A resolved input: cache identifier plus the URL to fetch it from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub id: String,
    pub url: String,
}

/// A configured retriever bound to its cache namespace
pub struct RetrievalEngine {
    retriever: Box<dyn Retriever>,
    cache: Arc<dyn KeyValueCache>,
    config: RetrieverConfig,
    clock: Arc<dyn Clock>,
}

impl RetrievalEngine {
    pub fn new(
        retriever: Box<dyn Retriever>,
        cache: Arc<dyn KeyValueCache>,
        config: RetrieverConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            retriever,
            cache,
            config,
            clock,
        }
    }

    pub fn name(&self) -> &str {
        self.retriever.name()
    }

    pub fn description(&self) -> &str {
        self.retriever.description()
    }

    pub fn config(&self) -> &RetrieverConfig {
        &self.config
    }

    /// Candidate inputs from the retriever, at most `n`
    pub fn list(&self, n: usize) -> Vec<String> {
        let mut items = self.retriever.list(n);
        items.truncate(n);
        items
    }

    /// Identifiers that have a raw slot in this retriever's namespace
    pub fn cached_ids(&self) -> Result<Vec<String>, RetrieveError> {
        let suffix = CacheSlot::Raw.suffix();
        Ok(self
            .cache
            .list()?
            .into_iter()
            .filter_map(|key| key.strip_suffix(suffix).map(str::to_string))
            .collect())
    }

    /// Map a URL or bare identifier to its identifier and URL
    ///
    /// Bare identifiers of irreversible schemes are resolved through the
    /// cached `.meta` record.
    pub fn resolve(&self, input: &str) -> Result<Resolved, RetrieveError> {
        self.resolve_at(input, self.clock.now())
    }

    fn resolve_at(&self, input: &str, now: DateTime<Utc>) -> Result<Resolved, RetrieveError> {
        if looks_like_url(input) {
            let id = self
                .retriever
                .url_to_id(input, now)
                .map_err(|reason| RetrieveError::resolution(input, reason))?;
            return Ok(Resolved {
                id,
                url: input.to_string(),
            });
        }

        if let Some(url) = self.retriever.id_to_url(input) {
            return Ok(Resolved {
                id: input.to_string(),
                url,
            });
        }

        match self.load_meta(input) {
            Ok(Some(meta)) => Ok(Resolved {
                id: input.to_string(),
                url: meta.url,
            }),
            Ok(None) | Err(_) => Err(RetrieveError::resolution(
                input,
                "not a URL, not reversible, and not cached",
            )),
        }
    }

    /// Retrieve one URL or identifier
    pub async fn retrieve(&self, input: &str) -> Result<Option<String>, RetrieveError> {
        let mut results = self.retrieve_many(&[input]).await?;
        Ok(results.pop().flatten())
    }

    /// Retrieve a batch, returning one entry per input in input order
    pub async fn retrieve_many<S: AsRef<str>>(
        &self,
        inputs: &[S],
    ) -> Result<Vec<Option<String>>, RetrieveError> {
        let now = self.clock.now();
        let resolved = inputs
            .iter()
            .map(|input| self.resolve_at(input.as_ref(), now))
            .collect::<Result<Vec<_>, _>>()?;

        let mut results: Vec<Option<String>> = vec![None; resolved.len()];
        let mut pending = Vec::new();

        for (index, item) in resolved.iter().enumerate() {
            if !self.config.force_fetch && self.cache.has(&CacheSlot::Raw.key(&item.id)) {
                results[index] = self.from_cache(item)?;
            } else {
                pending.push(index);
            }
        }

        if pending.is_empty() {
            return Ok(results);
        }

        let strategy = self.retriever.strategy();
        let urls: Vec<String> = pending.iter().map(|&i| resolved[i].url.clone()).collect();
        info!(
            retriever = self.name(),
            count = urls.len(),
            cached = resolved.len() - urls.len(),
            strategy = strategy.name(),
            concurrency = self.config.concurrency,
            "Fetching batch"
        );

        let outcomes = strategy.fetch_many(&urls, self.config.concurrency).await;
        for (index, outcome) in pending.into_iter().zip(outcomes) {
            results[index] = self.store_fetched(&resolved[index], outcome);
        }

        Ok(results)
    }

    fn from_cache(&self, item: &Resolved) -> Result<Option<String>, RetrieveError> {
        if !self.config.force_parse {
            if let Some(parsed) = self.cache.load(&CacheSlot::Parsed.key(&item.id))? {
                debug!(retriever = self.name(), id = %item.id, "Cache hit");
                return Ok(Some(String::from_utf8_lossy(&parsed).into_owned()));
            }
        }

        let Some(raw) = self.cache.load(&CacheSlot::Raw.key(&item.id))? else {
            return Ok(None);
        };
        let url = match self.load_meta(&item.id)? {
            Some(meta) => meta.effective_url().to_string(),
            None => item.url.clone(),
        };

        debug!(retriever = self.name(), id = %item.id, "Reparsing cached raw content");
        let parsed = self.parse_logged(&item.id, &url, &String::from_utf8_lossy(&raw));
        if let Some(text) = &parsed {
            if self.config.update_cache {
                self.cache
                    .save(&CacheSlot::Parsed.key(&item.id), text.as_bytes())?;
            }
        }
        Ok(parsed)
    }

    /// Parse one fetch outcome and write it back
    ///
    /// A failed cache write is logged; the parsed text is still returned.
    fn store_fetched(&self, item: &Resolved, outcome: FetchOutcome) -> Option<String> {
        let fetched = match outcome {
            Ok(fetched) => fetched,
            Err(e) => {
                warn!(retriever = self.name(), id = %item.id, url = %item.url, error = %e, "Fetch failed");
                return None;
            }
        };

        let redirect_url = (!fetched.final_url.is_empty()
            && !same_url(&fetched.final_url, &item.url))
        .then(|| fetched.final_url.clone());
        let meta = CacheMeta {
            url: item.url.clone(),
            redirect_url,
            extra: fetched.metadata,
        };

        let parsed = self.parse_logged(&item.id, meta.effective_url(), &fetched.raw);

        if self.config.update_cache {
            if let Err(e) = self.write_back(&item.id, &meta, &fetched.raw, parsed.as_deref()) {
                error!(retriever = self.name(), id = %item.id, error = %e, "Cache write failed");
            }
        }
        parsed
    }

    fn write_back(
        &self,
        id: &str,
        meta: &CacheMeta,
        raw: &str,
        parsed: Option<&str>,
    ) -> Result<(), CacheError> {
        // The three slots must describe the same fetch. A failed parse may
        // only land where there is no parsed text to contradict it.
        if parsed.is_none() && self.cache.has(&CacheSlot::Parsed.key(id)) {
            debug!(retriever = self.name(), id, "Keeping previous cache entry");
            return Ok(());
        }

        self.cache.save(&CacheSlot::Meta.key(id), &meta.to_bytes())?;
        self.cache.save(&CacheSlot::Raw.key(id), raw.as_bytes())?;
        if let Some(text) = parsed {
            self.cache.save(&CacheSlot::Parsed.key(id), text.as_bytes())?;
        }
        Ok(())
    }

    fn parse_logged(&self, id: &str, url: &str, raw: &str) -> Option<String> {
        let result = self
            .retriever
            .parse(url, raw)
            .and_then(|text| if text.is_empty() { Err(ParseError::Empty) } else { Ok(text) });
        match result {
            Ok(text) => Some(text),
            Err(e) => {
                warn!(retriever = self.name(), id, url, error = %e, "Parse failed");
                None
            }
        }
    }

    fn load_meta(&self, id: &str) -> Result<Option<CacheMeta>, RetrieveError> {
        let key = CacheSlot::Meta.key(id);
        match self.cache.load(&key)? {
            Some(bytes) => Ok(Some(CacheMeta::from_bytes(&key, &bytes)?)),
            None => Ok(None),
        }
    }
}

fn same_url(a: &str, b: &str) -> bool {
    match (Url::parse(a), Url::parse(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}
