//! Plain HTTP GET transport
//!
//! Usable from both strategies: the async [`Transport`] impl for
//! [`Cooperative`](super::Cooperative) and the [`BlockingTransport`] impl,
//! which drives the same request to completion on the current runtime
//! handle, for [`WorkerPool`](super::WorkerPool) threads.

use super::{BlockingTransport, FetchOutcome, Fetched, Transport};
use crate::error::FetchError;
use crate::DEFAULT_USER_AGENT;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE, LAST_MODIFIED, USER_AGENT};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::warn;

/// Connect timeout
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default total request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Deadline used when `now + timeout` does not fit an `Instant`
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// HTTP transport settings
#[derive(Debug, Clone)]
pub struct HttpOptions {
    /// Custom User-Agent
    pub user_agent: Option<String>,
    /// Proxy URL applied to all schemes
    pub proxy: Option<String>,
    /// Total time allowed for headers and body
    pub timeout: Duration,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            user_agent: None,
            proxy: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// reqwest-backed GET transport
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpTransport {
    /// Build the underlying client
    pub fn new(options: &HttpOptions) -> Result<Self, reqwest::Error> {
        let mut headers = HeaderMap::new();
        let user_agent = options.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT);
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(user_agent)
                .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_USER_AGENT)),
        );
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html, application/xhtml+xml, text/plain, */*;q=0.8"),
        );

        let mut builder = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(CONNECT_TIMEOUT.min(options.timeout));
        if let Some(proxy) = &options.proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy)?);
        }

        Ok(Self {
            client: builder.build()?,
            timeout: options.timeout,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(&self, url: &str) -> FetchOutcome {
        let now = tokio::time::Instant::now();
        let deadline = now
            .checked_add(self.timeout)
            .unwrap_or_else(|| now + FAR_FUTURE);

        let response = tokio::time::timeout_at(deadline, self.client.get(url).send())
            .await
            .map_err(|_| FetchError::Timeout)?
            .map_err(FetchError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
            });
        }

        let final_url = response.url().to_string();
        let metadata = response_metadata(response.headers());
        let body = read_body_until(response, deadline).await?;

        Ok(Fetched {
            final_url,
            metadata,
            raw: String::from_utf8_lossy(&body).into_owned(),
        })
    }
}

impl BlockingTransport for HttpTransport {
    fn fetch_blocking(&self, url: &str) -> FetchOutcome {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|_| FetchError::Request("no async runtime available".to_string()))?;
        handle.block_on(Transport::fetch(self, url))
    }
}

/// Header values worth keeping in the cache metadata
fn response_metadata(headers: &HeaderMap) -> BTreeMap<String, serde_json::Value> {
    let mut metadata = BTreeMap::new();
    for (name, key) in [(LAST_MODIFIED, "last-modified"), (CONTENT_TYPE, "content-type")] {
        if let Some(value) = headers.get(name).and_then(|v| v.to_str().ok()) {
            metadata.insert(key.to_string(), serde_json::Value::from(value));
        }
    }
    metadata
}

/// Read the whole body before `deadline`
///
/// Partial content is useless to a cache, so running out of time is a
/// failure rather than a truncated success.
async fn read_body_until(
    response: reqwest::Response,
    deadline: tokio::time::Instant,
) -> Result<Bytes, FetchError> {
    let mut body = Vec::new();
    let mut stream = response.bytes_stream();

    loop {
        tokio::select! {
            chunk = stream.next() => {
                match chunk {
                    Some(Ok(bytes)) => body.extend_from_slice(&bytes),
                    Some(Err(e)) => return Err(FetchError::from_reqwest(e)),
                    None => return Ok(Bytes::from(body)),
                }
            }
            _ = tokio::time::sleep_until(deadline) => {
                warn!(read = body.len(), "Body timeout reached");
                return Err(FetchError::Timeout);
            }
        }
    }
}
