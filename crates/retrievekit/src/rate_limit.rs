//! Per-authority request pacing
//!
//! Every fetch, whichever retriever issued it, passes through one shared
//! [`DomainRateLimiter`]. For each authority (`scheme://host:port`) the
//! limiter remembers the instant the most recent request was allowed to
//! go out. A caller reserves its own dispatch slot inside a single critical
//! section: the slot is the later of "now" and "previous slot + a random
//! delay drawn from the [`Pacing`] interval", and it is stored before the lock
//! is released. Callers then sleep until their slot without holding the lock.
//!
//! Because reading, checking, and updating the timestamp happen together,
//! concurrent callers for one authority are serialized with a gap of at
//! least `Pacing::min` between consecutive dispatches.

use rand::Rng;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, TryFromFloatSecsError};
use tokio::time::Instant;
use tracing::debug;
use url::Url;

/// Randomized minimum interval between two requests to one authority
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    min: Duration,
    max: Duration,
}

impl Pacing {
    /// No pacing at all
    pub const NONE: Pacing = Pacing {
        min: Duration::ZERO,
        max: Duration::ZERO,
    };

    /// Interval `[min, max]`; the bounds are swapped if given in reverse
    pub fn new(min: Duration, max: Duration) -> Self {
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }

    /// Fixed interval
    pub fn fixed(delay: Duration) -> Self {
        Self::new(delay, delay)
    }

    /// `[0.5 * mean, 1.5 * mean]` seconds
    ///
    /// Zero and negative means disable pacing. Fails when the bounds do not
    /// fit a `Duration`.
    pub fn around_mean(mean_secs: f64) -> Result<Self, TryFromFloatSecsError> {
        if mean_secs <= 0.0 {
            return Ok(Self::NONE);
        }
        Ok(Self::new(
            Duration::try_from_secs_f64(mean_secs * 0.5)?,
            Duration::try_from_secs_f64(mean_secs * 1.5)?,
        ))
    }

    pub fn min(&self) -> Duration {
        self.min
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    /// Draw one delay from the interval
    pub fn sample(&self) -> Duration {
        if self.min == self.max {
            return self.min;
        }
        let secs = rand::rng().random_range(self.min.as_secs_f64()..=self.max.as_secs_f64());
        Duration::try_from_secs_f64(secs).map_or(self.max, |d| d.clamp(self.min, self.max))
    }
}

impl Default for Pacing {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_millis(1500))
    }
}

/// `scheme://host[:port]` of a URL, the unit of pacing
pub fn authority(url: &str) -> Option<String> {
    let url = Url::parse(url).ok()?;
    let host = url.host_str()?;
    let port = url.port().map(|p| format!(":{p}")).unwrap_or_default();
    Some(format!("{}://{}{}", url.scheme(), host, port))
}

/// Process-wide map of authority to last dispatch slot
#[derive(Debug, Default)]
pub struct DomainRateLimiter {
    slots: Mutex<HashMap<String, Instant>>,
}

impl DomainRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the next dispatch instant for the authority of `url`
    ///
    /// URLs without an authority are not paced and get "now".
    pub fn reserve(&self, url: &str, pacing: &Pacing) -> Instant {
        let now = Instant::now();
        let Some(key) = authority(url) else {
            return now;
        };

        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = match slots.get(&key) {
            // An unrepresentable slot is as good as never; keep the last one.
            Some(&last) => now.max(last.checked_add(pacing.sample()).unwrap_or(last)),
            None => now,
        };
        slots.insert(key.clone(), slot);
        drop(slots);

        if slot > now {
            debug!(
                authority = %key,
                wait_ms = (slot - now).as_millis() as u64,
                "Pacing request"
            );
        }
        slot
    }

    /// Wait asynchronously for this caller's turn on the authority of `url`
    pub async fn await_turn(&self, url: &str, pacing: &Pacing) {
        let slot = self.reserve(url, pacing);
        tokio::time::sleep_until(slot).await;
    }

    /// Block the current thread until this caller's turn
    ///
    /// For worker threads doing blocking I/O. Must not be called from an
    /// async task.
    pub fn await_turn_blocking(&self, url: &str, pacing: &Pacing) {
        let slot = self.reserve(url, pacing);
        let now = Instant::now();
        if slot > now {
            std::thread::sleep(slot - now);
        }
    }

    /// Last reserved slot for an authority, if any
    pub fn last_dispatch(&self, authority: &str) -> Option<Instant> {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(authority)
            .copied()
    }
}
