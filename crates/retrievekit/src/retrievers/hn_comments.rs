//! Hacker News discussion retriever
//!
//! Threads live at `<base_url>item?id=<N>` and are identified by `N`, so
//! identifiers map back to URLs without the cache. The parser flattens the
//! comment tree into one line per comment, indented two spaces per level:
//!
//! ```text
//! **[Story title](https://story.example.com/)**
//! id: 101 (by alice): Top-level comment
//!   id: 102 (by bob, reply to 101): A reply
//! ```
//!
//! `list` returns nothing: discovering threads needs the front page, and
//! listing never goes to the network.
//!
//! Parameters: `base_url`, `mean_delay` (default `3`), `backend`,
//! `service_url`, `use_browser`, `mobile`, `proxy`, `timeout`.

use super::{pacing_param, web_transport};
use crate::config::RetrieverParams;
use crate::convert::{html_to_markdown, parse_selector};
use crate::error::{ParseError, RetrieveError};
use crate::fetch::{Cooperative, FetchStrategy};
use crate::registry::RetrievalContext;
use crate::retriever::Retriever;
use chrono::{DateTime, Utc};
use scraper::{ElementRef, Html, Selector};
use std::collections::HashMap;
use url::Url;

pub const NAME: &str = "hn_comments";
pub const DESCRIPTION: &str = "Hacker News discussion threads, one line per comment";

pub const DEFAULT_BASE_URL: &str = "https://news.ycombinator.com/";

/// HN asks crawlers to go slowly
const DEFAULT_MEAN_DELAY_SECS: f64 = 3.0;

const TITLE_SELECTOR: &str = "span.titleline > a";
const COMMENT_SELECTOR: &str = "tr.athing.comtr";
const USER_SELECTOR: &str = "a.hnuser";
const TEXT_SELECTOR: &str = ".commtext";
const HEAD_LINK_SELECTOR: &str = ".comhead a";

/// Retriever for comment threads
pub struct HnCommentsRetriever {
    item_url: Url,
    strategy: Cooperative,
}

/// Registry factory
pub fn build(
    params: &RetrieverParams,
    ctx: &RetrievalContext,
) -> Result<Box<dyn Retriever>, RetrieveError> {
    Ok(Box::new(HnCommentsRetriever::from_params(params, ctx)?))
}

impl HnCommentsRetriever {
    pub fn from_params(
        params: &RetrieverParams,
        ctx: &RetrievalContext,
    ) -> Result<Self, RetrieveError> {
        let base = params.get("base_url").unwrap_or(DEFAULT_BASE_URL);
        let item_url = item_url(base).ok_or_else(|| {
            RetrieveError::configuration(NAME, format!("base_url must be an http(s) URL, got '{base}'"))
        })?;

        let transport = web_transport(NAME, params, ctx)?;
        let pacing = pacing_param(NAME, params, DEFAULT_MEAN_DELAY_SECS)?;

        Ok(Self {
            item_url,
            strategy: Cooperative::new(transport, ctx.limiter.clone(), pacing),
        })
    }
}

/// `<base>item`, with the base treated as a directory
fn item_url(base: &str) -> Option<Url> {
    let mut base = Url::parse(base).ok()?;
    if !matches!(base.scheme(), "http" | "https") {
        return None;
    }
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join("item").ok()
}

fn is_item_id(id: &str) -> bool {
    !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit())
}

impl Retriever for HnCommentsRetriever {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        DESCRIPTION
    }

    fn url_to_id(&self, url: &str, _now: DateTime<Utc>) -> Result<String, String> {
        let expected = || format!("expected {}?id=<number>, got {url}", self.item_url);
        let parsed = Url::parse(url).map_err(|_| expected())?;
        let same_page = parsed.scheme() == self.item_url.scheme()
            && parsed.host_str() == self.item_url.host_str()
            && parsed.port_or_known_default() == self.item_url.port_or_known_default()
            && parsed.path() == self.item_url.path();
        if !same_page {
            return Err(expected());
        }
        parsed
            .query_pairs()
            .find(|(key, _)| key == "id")
            .map(|(_, value)| value.into_owned())
            .filter(|id| is_item_id(id))
            .ok_or_else(expected)
    }

    fn id_to_url(&self, id: &str) -> Option<String> {
        is_item_id(id).then(|| format!("{}?id={id}", self.item_url))
    }

    fn list(&self, _n: usize) -> Vec<String> {
        Vec::new()
    }

    fn parse(&self, url: &str, raw: &str) -> Result<String, ParseError> {
        let thread = Thread::from_html(url, raw)?;
        if thread.title.is_none() && thread.comments.is_empty() {
            return Err(ParseError::MissingContent(format!("no discussion thread on {url}")));
        }
        Ok(thread.render())
    }

    fn strategy(&self) -> &dyn FetchStrategy {
        &self.strategy
    }
}

#[derive(Debug, PartialEq, Eq)]
struct Comment {
    id: String,
    user: String,
    parent: Option<String>,
    text: String,
}

#[derive(Debug)]
struct Thread {
    /// Story title and link
    title: Option<(String, String)>,
    /// Comments in page order
    comments: Vec<Comment>,
}

fn selector(css: &str) -> Result<Selector, ParseError> {
    parse_selector(css).map_err(ParseError::Invalid)
}

impl Thread {
    fn from_html(page_url: &str, html: &str) -> Result<Self, ParseError> {
        let document = Html::parse_document(html);
        let title_selector = selector(TITLE_SELECTOR)?;
        let comment_selector = selector(COMMENT_SELECTOR)?;
        let user_selector = selector(USER_SELECTOR)?;
        let text_selector = selector(TEXT_SELECTOR)?;
        let head_link_selector = selector(HEAD_LINK_SELECTOR)?;

        let base = Url::parse(page_url).ok();
        let title = document.select(&title_selector).next().map(|link| {
            let text = link.text().collect::<String>().trim().to_string();
            let href = link.value().attr("href").unwrap_or_default();
            let href = base
                .as_ref()
                .and_then(|b| b.join(href).ok())
                .map_or_else(|| href.to_string(), |u| u.to_string());
            (text, href)
        });

        let comments = document
            .select(&comment_selector)
            .filter_map(|row| {
                let id = row.value().attr("id").filter(|id| is_item_id(id))?;
                let user = row
                    .select(&user_selector)
                    .next()
                    .map(|u| u.text().collect::<String>())
                    .unwrap_or_else(|| "[deleted]".to_string());
                let parent = row
                    .select(&head_link_selector)
                    .find(|a| a.text().collect::<String>().trim() == "parent")
                    .and_then(|a| a.value().attr("href"))
                    .and_then(parent_id);
                let text = row
                    .select(&text_selector)
                    .next()
                    .map(comment_text)
                    .unwrap_or_default();
                Some(Comment {
                    id: id.to_string(),
                    user,
                    parent,
                    text,
                })
            })
            .collect();

        Ok(Self { title, comments })
    }

    fn render(&self) -> String {
        let levels = nesting_levels(&self.comments);
        let mut lines = Vec::with_capacity(self.comments.len() + 1);
        if let Some((text, href)) = &self.title {
            lines.push(format!("**[{text}]({href})**"));
        }
        for (comment, level) in self.comments.iter().zip(levels) {
            let reply_to = comment
                .parent
                .as_ref()
                .map(|p| format!(", reply to {p}"))
                .unwrap_or_default();
            lines.push(format!(
                "{}id: {} (by {}{}): {}",
                "  ".repeat(level),
                comment.id,
                comment.user,
                reply_to,
                comment.text
            ));
        }
        lines.join("\n")
    }
}

/// Parent id from `#123` or `item?id=1#123` or `item?id=123`
fn parent_id(href: &str) -> Option<String> {
    let id = match href.rsplit_once('#') {
        Some((_, fragment)) => fragment,
        None => href.split_once("id=")?.1.split('&').next()?,
    };
    is_item_id(id).then(|| id.to_string())
}

/// Comment body as single-line markdown
fn comment_text(element: ElementRef<'_>) -> String {
    html_to_markdown(&element.inner_html())
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Depth of each comment in the reply tree
///
/// Top-level comments are level 0. A reply whose parent is not on the page
/// sits one level below an unseen root.
fn nesting_levels(comments: &[Comment]) -> Vec<usize> {
    let index: HashMap<&str, usize> = comments
        .iter()
        .enumerate()
        .map(|(i, c)| (c.id.as_str(), i))
        .collect();
    let mut levels = vec![None; comments.len()];
    (0..comments.len())
        .map(|i| level_of(i, comments, &index, &mut levels, 0))
        .collect()
}

fn level_of(
    i: usize,
    comments: &[Comment],
    index: &HashMap<&str, usize>,
    levels: &mut [Option<usize>],
    depth: usize,
) -> usize {
    if let Some(level) = levels[i] {
        return level;
    }
    let level = match comments[i].parent.as_deref() {
        None => 0,
        Some(parent) => match index.get(parent) {
            // depth bound stops malformed parent cycles
            Some(&j) if j != i && depth < comments.len() => {
                level_of(j, comments, index, levels, depth + 1) + 1
            }
            _ => 1,
        },
    };
    levels[i] = Some(level);
    level
}
