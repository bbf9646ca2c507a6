//! Crawl service transport
//!
//! Delegates page loading to an external crawl service (a headless browser
//! farm behind a small JSON API). One request:
//!
//! ```text
//! POST {base}/api/v1/crawl
//! {"url": "...", "formats": ["html"], "use_browser": true, "timeout": 30}
//!
//! {"success": true,
//!  "data": {"url": "<final url>", "formats": {"html": "..."},
//!           "metadata": {"title": "..."}}}
//! ```
//!
//! On failure the service answers `{"success": false, "error": {"code",
//! "message"}, "debug_id"}`.

use super::{FetchOutcome, Fetched, Transport};
use crate::error::FetchError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Default service location
pub const DEFAULT_SERVICE_URL: &str = "http://localhost:8000";

/// Extra time granted on top of the crawl timeout for the API round trip
const API_OVERHEAD: Duration = Duration::from_secs(10);

/// Maximum characters of a service response quoted in errors
const ERROR_EXCERPT: usize = 300;

/// Per-request crawl settings sent to the service
#[derive(Debug, Clone)]
pub struct CrawlServiceOptions {
    /// Base URL of the service
    pub base_url: String,
    /// Requested formats; the first one becomes the raw content
    pub formats: Vec<String>,
    /// Render pages in a browser
    pub use_browser: bool,
    /// Emulate a mobile device
    pub mobile: bool,
    /// Proxy used by the service for outgoing requests
    pub proxy: Option<String>,
    /// Crawl timeout passed to the service
    pub timeout: Duration,
}

impl Default for CrawlServiceOptions {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_SERVICE_URL.to_string(),
            formats: vec!["html".to_string()],
            use_browser: true,
            mobile: false,
            proxy: None,
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Serialize)]
struct CrawlRequest<'a> {
    url: &'a str,
    formats: &'a [String],
    use_browser: bool,
    timeout: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    proxy: Option<&'a str>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    mobile: bool,
}

#[derive(Debug, Deserialize)]
struct CrawlResponse {
    #[serde(default)]
    success: bool,
    data: Option<CrawlData>,
    error: Option<serde_json::Value>,
    debug_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CrawlData {
    url: String,
    #[serde(default)]
    formats: HashMap<String, String>,
    #[serde(default)]
    metadata: CrawlMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct CrawlMetadata {
    title: Option<String>,
}

/// Transport that asks a crawl service to load pages
#[derive(Debug, Clone)]
pub struct CrawlServiceTransport {
    client: reqwest::Client,
    endpoint: String,
    options: CrawlServiceOptions,
}

impl CrawlServiceTransport {
    pub fn new(options: CrawlServiceOptions) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(options.timeout.saturating_add(API_OVERHEAD))
            .build()?;
        let endpoint = format!("{}/api/v1/crawl", options.base_url.trim_end_matches('/'));
        Ok(Self {
            client,
            endpoint,
            options,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Transport for CrawlServiceTransport {
    async fn fetch(&self, url: &str) -> FetchOutcome {
        let payload = CrawlRequest {
            url,
            formats: &self.options.formats,
            use_browser: self.options.use_browser,
            timeout: self.options.timeout.as_secs(),
            proxy: self.options.proxy.as_deref(),
            mobile: self.options.mobile,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&payload)
            .send()
            .await
            .map_err(FetchError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
            });
        }

        let text = response.text().await.map_err(FetchError::from_reqwest)?;
        let parsed: CrawlResponse = serde_json::from_str(&text).map_err(|_| {
            FetchError::Service(format!("non-JSON response: {}", excerpt(&text)))
        })?;

        let data = match parsed.data {
            Some(data) if parsed.success => data,
            _ => return Err(FetchError::Service(describe_failure(&parsed, &text))),
        };

        let first_format = self.options.formats.first().map(String::as_str).unwrap_or("html");
        let raw = data.formats.get(first_format).cloned().unwrap_or_default();

        let mut fetched = Fetched::new(data.url, raw);
        if let Some(title) = data.metadata.title.filter(|t| !t.is_empty()) {
            fetched = fetched.with_meta("title", title);
        }
        Ok(fetched)
    }
}

fn describe_failure(response: &CrawlResponse, text: &str) -> String {
    let (code, message) = match &response.error {
        Some(serde_json::Value::Object(map)) => (
            map.get("code").and_then(|v| v.as_str()).unwrap_or("UNKNOWN").to_string(),
            map.get("message").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
        ),
        Some(serde_json::Value::String(s)) => ("UNKNOWN".to_string(), s.clone()),
        Some(other) => ("UNKNOWN".to_string(), other.to_string()),
        None => ("UNKNOWN".to_string(), String::new()),
    };
    format!(
        "{code} - {message} (debug_id: {}, response: {})",
        response.debug_id.as_deref().unwrap_or("unknown"),
        excerpt(text)
    )
}

fn excerpt(text: &str) -> &str {
    match text.char_indices().nth(ERROR_EXCERPT) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
