//! Built-in retrievers
//!
//! - [`page`] - any web page, as markdown or as a list of selected links
//! - [`daily_news`] - one transcript page per day, enumerable by date
//! - [`hn_comments`] - Hacker News discussion threads

pub mod daily_news;
pub mod hn_comments;
pub mod page;

pub use daily_news::DailyNewsRetriever;
pub use hn_comments::HnCommentsRetriever;
pub use page::PageRetriever;

use crate::config::RetrieverParams;
use crate::error::RetrieveError;
use crate::fetch::{
    CrawlServiceOptions, CrawlServiceTransport, HttpOptions, HttpTransport, Transport,
    DEFAULT_SERVICE_URL,
};
use crate::rate_limit::Pacing;
use crate::registry::RetrievalContext;
use std::sync::Arc;
use std::time::Duration;

/// Seconds allowed per request unless `timeout` says otherwise
const DEFAULT_TIMEOUT_SECS: f64 = 30.0;

/// Seconds between requests to one host on average
const DEFAULT_MEAN_DELAY_SECS: f64 = 1.0;

/// `mean_delay` parameter as pacing of `[0.5x, 1.5x]`
fn pacing_param(
    retriever: &str,
    params: &RetrieverParams,
    default_mean: f64,
) -> Result<Pacing, RetrieveError> {
    let mean = params.f64(retriever, "mean_delay", default_mean)?;
    Pacing::around_mean(mean).map_err(|e| {
        RetrieveError::configuration(retriever, format!("mean_delay out of range: {e}"))
    })
}

/// Positive `timeout` parameter in seconds
fn timeout_param(retriever: &str, params: &RetrieverParams) -> Result<Duration, RetrieveError> {
    let secs = params.f64(retriever, "timeout", DEFAULT_TIMEOUT_SECS)?;
    if secs <= 0.0 {
        return Err(RetrieveError::configuration(
            retriever,
            "timeout must be positive",
        ));
    }
    Duration::try_from_secs_f64(secs).map_err(|e| {
        RetrieveError::configuration(retriever, format!("timeout out of range: {e}"))
    })
}

/// Plain HTTP transport honouring `proxy`, `timeout` and the context's User-Agent
fn http_transport(
    retriever: &str,
    params: &RetrieverParams,
    ctx: &RetrievalContext,
) -> Result<HttpTransport, RetrieveError> {
    let options = HttpOptions {
        user_agent: ctx.user_agent.clone(),
        proxy: params.get("proxy").map(str::to_string),
        timeout: timeout_param(retriever, params)?,
    };
    HttpTransport::new(&options)
        .map_err(|e| RetrieveError::configuration(retriever, format!("HTTP client: {e}")))
}

/// `backend=http` (default) or `backend=crawl_service` with its options
fn web_transport(
    retriever: &str,
    params: &RetrieverParams,
    ctx: &RetrievalContext,
) -> Result<Arc<dyn Transport>, RetrieveError> {
    match params.get("backend").unwrap_or("http") {
        "http" => Ok(Arc::new(http_transport(retriever, params, ctx)?)),
        "crawl_service" => {
            let options = CrawlServiceOptions {
                base_url: params
                    .get("service_url")
                    .unwrap_or(DEFAULT_SERVICE_URL)
                    .to_string(),
                use_browser: params.bool(retriever, "use_browser", true)?,
                mobile: params.bool(retriever, "mobile", false)?,
                proxy: params.get("proxy").map(str::to_string),
                timeout: timeout_param(retriever, params)?,
                ..Default::default()
            };
            let transport = CrawlServiceTransport::new(options).map_err(|e| {
                RetrieveError::configuration(retriever, format!("crawl service client: {e}"))
            })?;
            Ok(Arc::new(transport))
        }
        other => Err(RetrieveError::configuration(
            retriever,
            format!("unknown backend '{other}', expected http or crawl_service"),
        )),
    }
}
