//! Site-specific retriever contract

use crate::error::ParseError;
use crate::fetch::FetchStrategy;
use chrono::{DateTime, Utc};

/// Trait for one content source
///
/// A retriever knows how to map between URLs and cache identifiers, how to
/// enumerate candidate items, which fetch strategy suits its transport, and
/// how to turn raw content into normalized text. Caching, batching and
/// failure isolation live in [`RetrievalEngine`](crate::RetrievalEngine),
/// which depends only on this trait.
pub trait Retriever: Send + Sync {
    /// Registry name, also used as the cache namespace
    fn name(&self) -> &str;

    /// One-line human description
    fn description(&self) -> &str;

    /// Derive the identifier for `url` at time `now`
    ///
    /// Returns a human-readable reason when the URL does not belong to this
    /// retriever.
    fn url_to_id(&self, url: &str, now: DateTime<Utc>) -> Result<String, String>;

    /// Reconstruct a URL from an identifier, if the scheme is reversible
    fn id_to_url(&self, id: &str) -> Option<String>;

    /// Up to `n` candidate inputs, without touching the network or cache
    fn list(&self, n: usize) -> Vec<String>;

    /// Normalize raw content fetched from `url`
    fn parse(&self, url: &str, raw: &str) -> Result<String, ParseError>;

    /// Strategy used to fetch cache misses
    fn strategy(&self) -> &dyn FetchStrategy;
}
