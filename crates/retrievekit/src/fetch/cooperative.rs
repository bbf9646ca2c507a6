//! Cooperative concurrent fetching on a single task

use super::{FetchOutcome, FetchStrategy, Transport};
use crate::error::FetchError;
use crate::rate_limit::{DomainRateLimiter, Pacing};
use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::debug;

/// One future per URL, polled together on the calling task
///
/// A semaphore admits at most `concurrency` requests at a time. Each admitted
/// request still waits for its turn on the rate limiter before it is sent.
pub struct Cooperative {
    transport: Arc<dyn Transport>,
    limiter: Arc<DomainRateLimiter>,
    pacing: Pacing,
}

impl Cooperative {
    pub fn new(
        transport: Arc<dyn Transport>,
        limiter: Arc<DomainRateLimiter>,
        pacing: Pacing,
    ) -> Self {
        Self {
            transport,
            limiter,
            pacing,
        }
    }

    async fn fetch_one(&self, gate: &Semaphore, url: &str) -> FetchOutcome {
        let _permit = gate.acquire().await.map_err(|_| FetchError::Aborted)?;
        self.limiter.await_turn(url, &self.pacing).await;
        debug!(url, "Fetching");
        self.transport.fetch(url).await
    }
}

#[async_trait]
impl FetchStrategy for Cooperative {
    fn name(&self) -> &'static str {
        "cooperative"
    }

    async fn fetch_many(&self, urls: &[String], concurrency: usize) -> Vec<FetchOutcome> {
        let gate = Semaphore::new(concurrency.max(1));
        join_all(urls.iter().map(|url| self.fetch_one(&gate, url))).await
    }
}
