//! Fetch strategies and transports
//!
//! Design: a transport performs one request. A [`FetchStrategy`] runs a batch
//! of requests through a transport, pacing each one with the shared
//! [`DomainRateLimiter`](crate::rate_limit::DomainRateLimiter), and returns
//! one [`FetchOutcome`] per URL in input order. A failed item is an `Err`
//! in its own slot and never affects the rest of the batch.
//!
//! Two strategies exist:
//! - [`WorkerPool`] - a fixed set of blocking workers draining a queue
//! - [`Cooperative`] - one task interleaving many in-flight requests,
//!   bounded by a semaphore

mod cooperative;
mod crawl_service;
mod http;
mod worker_pool;

pub use cooperative::Cooperative;
pub use crawl_service::{CrawlServiceOptions, CrawlServiceTransport, DEFAULT_SERVICE_URL};
pub use http::{HttpOptions, HttpTransport};
pub use worker_pool::WorkerPool;

use crate::error::FetchError;
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Successful transport result
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fetched {
    /// URL the content was finally served from (after redirects)
    pub final_url: String,
    /// Transport metadata such as `last-modified` or `title`
    pub metadata: BTreeMap<String, serde_json::Value>,
    /// Unmodified content
    pub raw: String,
}

impl Fetched {
    /// Content served from `url` without metadata
    pub fn new(url: impl Into<String>, raw: impl Into<String>) -> Self {
        Self {
            final_url: url.into(),
            raw: raw.into(),
            ..Default::default()
        }
    }

    /// Attach a metadata entry
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Outcome of one transport attempt
pub type FetchOutcome = Result<Fetched, FetchError>;

/// Transport whose requests suspend at network I/O
#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch(&self, url: &str) -> FetchOutcome;
}

/// Transport that blocks the calling thread for the whole request
pub trait BlockingTransport: Send + Sync {
    fn fetch_blocking(&self, url: &str) -> FetchOutcome;
}

/// Runs a batch of fetches with bounded concurrency
///
/// Implementations must return exactly one outcome per input URL, in input
/// order, and must report per-item failures as `Err` in that item's slot.
#[async_trait]
pub trait FetchStrategy: Send + Sync {
    /// Identifier for logging
    fn name(&self) -> &'static str;

    /// Fetch every URL, at most `concurrency` at a time
    async fn fetch_many(&self, urls: &[String], concurrency: usize) -> Vec<FetchOutcome>;
}
