//! Generic web page retriever
//!
//! Pages are identified by the bucketed scheme, so a page is fetched again
//! once its `cache_expire` window has passed. Fetching is cooperative, over
//! either plain HTTP or a crawl service.
//!
//! Parameters:
//!
//! | key | default | meaning |
//! |-----|---------|---------|
//! | `cache_expire` | `168` | bucket width in hours |
//! | `mean_delay` | `1` | average seconds between requests to one host |
//! | `parser` | `markdown` | `markdown` or `links` |
//! | `link_selector` | | CSS selector, required for `parser=links` |
//! | `strip_boilerplate` | `false` | drop navigation-like markdown lines |
//! | `backend` | `http` | `http` or `crawl_service` |
//! | `service_url` | `http://localhost:8000` | crawl service location |
//! | `use_browser` | `true` | crawl service renders in a browser |
//! | `mobile` | `false` | crawl service emulates a mobile device |
//! | `proxy` | | proxy URL |
//! | `timeout` | `30` | seconds per request |

use super::{pacing_param, web_transport, DEFAULT_MEAN_DELAY_SECS};
use crate::config::RetrieverParams;
use crate::convert::{
    extract_links, html_to_markdown, is_html, parse_selector, strip_boilerplate,
};
use crate::error::{ParseError, RetrieveError};
use crate::fetch::{Cooperative, FetchStrategy};
use crate::identifier::{BucketedIds, TimeBucket};
use crate::registry::RetrievalContext;
use crate::retriever::Retriever;
use chrono::{DateTime, Utc};

pub const NAME: &str = "page";
pub const DESCRIPTION: &str = "Any web page, as markdown or as a JSON list of selected links";

/// Default bucket width: one week
const DEFAULT_CACHE_EXPIRE_HOURS: usize = 168;

#[derive(Debug, Clone, PartialEq, Eq)]
enum PageParser {
    Markdown { strip_boilerplate: bool },
    Links { selector: String },
}

/// Retriever for arbitrary pages
pub struct PageRetriever {
    ids: BucketedIds,
    parser: PageParser,
    strategy: Cooperative,
}

/// Registry factory
pub fn build(
    params: &RetrieverParams,
    ctx: &RetrievalContext,
) -> Result<Box<dyn Retriever>, RetrieveError> {
    Ok(Box::new(PageRetriever::from_params(params, ctx)?))
}

impl PageRetriever {
    pub fn from_params(
        params: &RetrieverParams,
        ctx: &RetrievalContext,
    ) -> Result<Self, RetrieveError> {
        let hours = params.usize(NAME, "cache_expire", DEFAULT_CACHE_EXPIRE_HOURS)?;
        let bucket = u32::try_from(hours)
            .ok()
            .and_then(TimeBucket::new)
            .ok_or_else(|| {
                RetrieveError::configuration(NAME, "cache_expire must be between 1 and 2^32-1 hours")
            })?;

        let parser = match params.get("parser").unwrap_or("markdown") {
            "markdown" => PageParser::Markdown {
                strip_boilerplate: params.bool(NAME, "strip_boilerplate", false)?,
            },
            "links" => {
                let selector = params.require(NAME, "link_selector")?;
                parse_selector(selector).map_err(|e| RetrieveError::configuration(NAME, e))?;
                PageParser::Links {
                    selector: selector.to_string(),
                }
            }
            other => {
                return Err(RetrieveError::configuration(
                    NAME,
                    format!("unknown parser '{other}', expected markdown or links"),
                ))
            }
        };

        let transport = web_transport(NAME, params, ctx)?;
        let pacing = pacing_param(NAME, params, DEFAULT_MEAN_DELAY_SECS)?;
        let strategy = Cooperative::new(transport, ctx.limiter.clone(), pacing);

        Ok(Self {
            ids: BucketedIds::new(bucket),
            parser,
            strategy,
        })
    }

    fn parse_markdown(raw: &str, strip: bool) -> Result<String, ParseError> {
        let markdown = if is_html(None, raw) || raw.trim_start().starts_with('<') {
            html_to_markdown(raw)
        } else {
            raw.trim().to_string()
        };
        let markdown = if strip {
            strip_boilerplate(&markdown).trim().to_string()
        } else {
            markdown
        };
        if markdown.is_empty() {
            return Err(ParseError::Empty);
        }
        Ok(markdown)
    }

    fn parse_links(url: &str, raw: &str, selector: &str) -> Result<String, ParseError> {
        let selector = parse_selector(selector).map_err(ParseError::Invalid)?;
        let links = extract_links(raw, url, &selector);
        if links.is_empty() {
            return Err(ParseError::MissingContent(format!(
                "no links matching the selector on {url}"
            )));
        }
        serde_json::to_string_pretty(&links).map_err(|e| ParseError::Invalid(e.to_string()))
    }
}

impl Retriever for PageRetriever {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        DESCRIPTION
    }

    fn url_to_id(&self, url: &str, now: DateTime<Utc>) -> Result<String, String> {
        self.ids.url_to_id(url, now)
    }

    fn id_to_url(&self, _id: &str) -> Option<String> {
        None
    }

    fn list(&self, _n: usize) -> Vec<String> {
        Vec::new()
    }

    fn parse(&self, url: &str, raw: &str) -> Result<String, ParseError> {
        match &self.parser {
            PageParser::Markdown { strip_boilerplate } => {
                Self::parse_markdown(raw, *strip_boilerplate)
            }
            PageParser::Links { selector } => Self::parse_links(url, raw, selector),
        }
    }

    fn strategy(&self) -> &dyn FetchStrategy {
        &self.strategy
    }
}
