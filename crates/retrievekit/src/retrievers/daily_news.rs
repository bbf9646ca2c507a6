//! Daily news transcript retriever
//!
//! One page per day under `<base_url><YYYYMMDD>/`, so identifiers are plain
//! dates and `list` can enumerate them without any network access. Pages are
//! fetched by a worker pool over blocking HTTP.

use super::{http_transport, pacing_param, DEFAULT_MEAN_DELAY_SECS};
use crate::config::RetrieverParams;
use crate::convert::{parse_selector, select_text};
use crate::error::{ParseError, RetrieveError};
use crate::fetch::{FetchStrategy, WorkerPool};
use crate::identifier::DateIds;
use crate::registry::RetrievalContext;
use crate::retriever::Retriever;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::sync::Arc;

pub const NAME: &str = "daily_news";
pub const DESCRIPTION: &str = "Daily evening news transcripts, one page per date";

/// Site the transcripts are published on
pub const DEFAULT_BASE_URL: &str = "https://cn.govopendata.com/xinwenlianbo/";

/// Element holding the transcript text
const CONTENT_SELECTOR: &str = "main.news-content";

/// A day's page is complete about this long after midnight UTC
const PUBLISH_LAG_HOURS: i64 = 21;

/// Retriever for dated transcript pages
pub struct DailyNewsRetriever {
    ids: DateIds,
    date_end: NaiveDate,
    strategy: WorkerPool,
}

/// Registry factory
pub fn build(
    params: &RetrieverParams,
    ctx: &RetrievalContext,
) -> Result<Box<dyn Retriever>, RetrieveError> {
    Ok(Box::new(DailyNewsRetriever::from_params(params, ctx)?))
}

impl DailyNewsRetriever {
    pub fn from_params(
        params: &RetrieverParams,
        ctx: &RetrievalContext,
    ) -> Result<Self, RetrieveError> {
        let ids = DateIds::new(params.get("base_url").unwrap_or(DEFAULT_BASE_URL));

        let date_end = match params.get("date_end") {
            Some(value) => DateIds::parse_date(value).ok_or_else(|| {
                RetrieveError::configuration(
                    NAME,
                    format!("date_end must be YYYYMMDD, got '{value}'"),
                )
            })?,
            None => (ctx.clock.now() - Duration::hours(PUBLISH_LAG_HOURS)).date_naive(),
        };

        let transport = Arc::new(http_transport(NAME, params, ctx)?);
        let pacing = pacing_param(NAME, params, DEFAULT_MEAN_DELAY_SECS)?;
        let strategy = WorkerPool::new(transport, ctx.limiter.clone(), pacing);

        Ok(Self {
            ids,
            date_end,
            strategy,
        })
    }

    /// Last date returned by `list`
    pub fn date_end(&self) -> NaiveDate {
        self.date_end
    }
}

impl Retriever for DailyNewsRetriever {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        DESCRIPTION
    }

    fn url_to_id(&self, url: &str, _now: DateTime<Utc>) -> Result<String, String> {
        self.ids.url_to_id(url)
    }

    fn id_to_url(&self, id: &str) -> Option<String> {
        self.ids.id_to_url(id)
    }

    fn list(&self, n: usize) -> Vec<String> {
        DateIds::recent(self.date_end, n)
    }

    fn parse(&self, _url: &str, raw: &str) -> Result<String, ParseError> {
        let selector = parse_selector(CONTENT_SELECTOR).map_err(ParseError::Invalid)?;
        let text = select_text(raw, &selector)
            .ok_or_else(|| ParseError::MissingContent(CONTENT_SELECTOR.to_string()))?;

        let lines: Vec<&str> = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect();
        Ok(lines.join("\n"))
    }

    fn strategy(&self) -> &dyn FetchStrategy {
        &self.strategy
    }
}
