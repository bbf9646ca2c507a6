//! Retriever registry
//!
//! Design: an explicit registry object instead of process-wide state. Build
//! it once at startup (usually through [`RetrieverRegistry::with_defaults`]),
//! then only look retrievers up.

use crate::cache::CacheBackend;
use crate::clock::{Clock, SystemClock};
use crate::config::{RetrieverConfig, RetrieverParams};
use crate::engine::RetrievalEngine;
use crate::error::RetrieveError;
use crate::rate_limit::DomainRateLimiter;
use crate::retriever::Retriever;
use crate::retrievers::{daily_news, hn_comments, page};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Collaborators shared by every retriever built from one registry
#[derive(Clone)]
pub struct RetrievalContext {
    /// Source of per-retriever cache namespaces
    pub cache: Arc<dyn CacheBackend>,
    /// Pacing shared across all retrievers
    pub limiter: Arc<DomainRateLimiter>,
    /// Time source for identifiers and date defaults
    pub clock: Arc<dyn Clock>,
    /// User-Agent override for HTTP transports
    pub user_agent: Option<String>,
}

impl RetrievalContext {
    /// Context with a fresh rate limiter and the system clock
    pub fn new(cache: Arc<dyn CacheBackend>) -> Self {
        Self {
            cache,
            limiter: Arc::new(DomainRateLimiter::new()),
            clock: Arc::new(SystemClock),
            user_agent: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_limiter(mut self, limiter: Arc<DomainRateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }
}

/// Builds a retriever from its parameters
pub type RetrieverFactory = Box<
    dyn Fn(&RetrieverParams, &RetrievalContext) -> Result<Box<dyn Retriever>, RetrieveError>
        + Send
        + Sync,
>;

struct Registration {
    description: String,
    factory: RetrieverFactory,
}

/// Name to factory mapping
pub struct RetrieverRegistry {
    context: RetrievalContext,
    entries: BTreeMap<String, Registration>,
}

impl RetrieverRegistry {
    /// Create an empty registry
    pub fn new(context: RetrievalContext) -> Self {
        Self {
            context,
            entries: BTreeMap::new(),
        }
    }

    /// Create a registry with the built-in retrievers registered
    pub fn with_defaults(context: RetrievalContext) -> Self {
        let mut registry = Self::new(context);
        let builtins: [(&str, &str, RetrieverFactory); 3] = [
            (page::NAME, page::DESCRIPTION, Box::new(page::build)),
            (daily_news::NAME, daily_news::DESCRIPTION, Box::new(daily_news::build)),
            (hn_comments::NAME, hn_comments::DESCRIPTION, Box::new(hn_comments::build)),
        ];
        for (name, description, factory) in builtins {
            // Built-in names are distinct.
            let _ = registry.register(name, description, factory);
        }
        registry
    }

    /// Register a factory under `name`
    pub fn register(
        &mut self,
        name: &str,
        description: &str,
        factory: RetrieverFactory,
    ) -> Result<(), RetrieveError> {
        if self.entries.contains_key(name) {
            return Err(RetrieveError::DuplicateRetriever(name.to_string()));
        }
        self.entries.insert(
            name.to_string(),
            Registration {
                description: description.to_string(),
                factory,
            },
        );
        Ok(())
    }

    /// Build the retriever `name` and bind it to its cache namespace
    pub fn lookup(
        &self,
        name: &str,
        params: &RetrieverParams,
    ) -> Result<RetrievalEngine, RetrieveError> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| RetrieveError::UnknownRetriever(name.to_string()))?;

        let config = RetrieverConfig::from_params(name, params)?;
        let retriever = (entry.factory)(params, &self.context)?;
        let cache = self.context.cache.namespace(name)?;
        debug!(retriever = name, ?config, "Retriever ready");

        Ok(RetrievalEngine::new(
            retriever,
            cache,
            config,
            self.context.clock.clone(),
        ))
    }

    /// Registered names with their descriptions, sorted by name
    pub fn names(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(name, entry)| (name.as_str(), entry.description.as_str()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn context(&self) -> &RetrievalContext {
        &self.context
    }
}
