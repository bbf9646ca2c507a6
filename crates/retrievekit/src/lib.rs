//! RetrieveKit - cached, rate-limited retrieval of remote documents
//!
//! This crate fetches remote documents through pluggable site retrievers,
//! normalizes them into text, and keeps both the raw and parsed forms in a
//! durable cache so repeated retrievals avoid the network.
//!
//! ## Retriever System
//!
//! A [`Retriever`] supplies the site-specific parts: identifier mapping,
//! listing, parsing, and the [`FetchStrategy`] for cache misses. The
//! [`RetrieverRegistry`] builds retrievers by name and binds each one to its
//! own cache namespace, producing a [`RetrievalEngine`] that handles caching,
//! batching, pacing and failure isolation.
//!
//! Built-in retrievers:
//! - [`PageRetriever`] (`page`) - any web page as markdown or selected links
//! - [`DailyNewsRetriever`] (`daily_news`) - dated daily transcript pages
//! - [`HnCommentsRetriever`] (`hn_comments`) - Hacker News threads, one line per comment
//!
//! ## Example
//!
//! ```no_run
//! use retrievekit::{FileCacheBackend, RetrievalContext, RetrieverParams, RetrieverRegistry};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), retrievekit::RetrieveError> {
//! let context = RetrievalContext::new(Arc::new(FileCacheBackend::new("/tmp/web_cache")));
//! let registry = RetrieverRegistry::with_defaults(context);
//! let engine = registry.lookup("daily_news", &RetrieverParams::new())?;
//!
//! let days = engine.list(3);
//! for (day, text) in days.iter().zip(engine.retrieve_many(&days).await?) {
//!     println!("{day}: {}", text.map(|t| t.len()).unwrap_or(0));
//! }
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod clock;
pub mod config;
pub mod convert;
mod engine;
mod error;
pub mod fetch;
pub mod identifier;
pub mod rate_limit;
mod registry;
mod retriever;
pub mod retrievers;

pub use cache::{
    CacheBackend, CacheMeta, CacheSlot, FileCache, FileCacheBackend, KeyValueCache, MemoryCache,
    MemoryCacheBackend,
};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{RetrieverConfig, RetrieverConfigBuilder, RetrieverParams, DEFAULT_CONCURRENCY};
pub use engine::{Resolved, RetrievalEngine};
pub use error::{CacheError, FetchError, ParseError, RetrieveError};
pub use fetch::{
    BlockingTransport, Cooperative, FetchOutcome, FetchStrategy, Fetched, Transport, WorkerPool,
};
pub use rate_limit::{DomainRateLimiter, Pacing};
pub use registry::{RetrievalContext, RetrieverFactory, RetrieverRegistry};
pub use retriever::Retriever;
pub use retrievers::{DailyNewsRetriever, HnCommentsRetriever, PageRetriever};

/// Default User-Agent string
pub const DEFAULT_USER_AGENT: &str = "Everruns RetrieveKit/1.0";
