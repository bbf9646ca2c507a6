//! Bounded worker pool over a blocking transport

use super::{BlockingTransport, FetchOutcome, FetchStrategy};
use crate::error::FetchError;
use crate::rate_limit::{DomainRateLimiter, Pacing};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

/// Fixed number of blocking workers draining a shared queue
///
/// Each worker runs on tokio's blocking thread pool, waits for its turn on
/// the rate limiter, then performs one blocking transport call at a time.
pub struct WorkerPool {
    transport: Arc<dyn BlockingTransport>,
    limiter: Arc<DomainRateLimiter>,
    pacing: Pacing,
}

impl WorkerPool {
    pub fn new(
        transport: Arc<dyn BlockingTransport>,
        limiter: Arc<DomainRateLimiter>,
        pacing: Pacing,
    ) -> Self {
        Self {
            transport,
            limiter,
            pacing,
        }
    }
}

#[async_trait]
impl FetchStrategy for WorkerPool {
    fn name(&self) -> &'static str {
        "worker_pool"
    }

    async fn fetch_many(&self, urls: &[String], concurrency: usize) -> Vec<FetchOutcome> {
        if urls.is_empty() {
            return Vec::new();
        }

        let (job_tx, job_rx) = crossbeam_channel::unbounded::<(usize, String)>();
        for job in urls.iter().cloned().enumerate() {
            // The receiver is alive until the workers finish.
            let _ = job_tx.send(job);
        }
        drop(job_tx);

        let (done_tx, done_rx) = crossbeam_channel::unbounded::<(usize, FetchOutcome)>();
        let workers = concurrency.clamp(1, urls.len());

        let handles: Vec<_> = (0..workers)
            .map(|worker| {
                let jobs = job_rx.clone();
                let done = done_tx.clone();
                let transport = self.transport.clone();
                let limiter = self.limiter.clone();
                let pacing = self.pacing;
                tokio::task::spawn_blocking(move || {
                    while let Ok((index, url)) = jobs.recv() {
                        limiter.await_turn_blocking(&url, &pacing);
                        debug!(worker, url = %url, "Fetching");
                        let outcome = transport.fetch_blocking(&url);
                        if done.send((index, outcome)).is_err() {
                            break;
                        }
                    }
                })
            })
            .collect();
        drop(done_tx);

        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Fetch worker stopped abnormally");
            }
        }

        let mut outcomes: Vec<Option<FetchOutcome>> = urls.iter().map(|_| None).collect();
        for (index, outcome) in done_rx.try_iter() {
            outcomes[index] = Some(outcome);
        }
        outcomes
            .into_iter()
            .map(|o| o.unwrap_or(Err(FetchError::Aborted)))
            .collect()
    }
}
