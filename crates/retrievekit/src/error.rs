//! Error types for RetrieveKit
//!
//! Only [`RetrieveError`] ever reaches the caller of a batch. [`FetchError`]
//! and [`ParseError`] describe per-item faults and are folded into `None`
//! entries of the batch result by the engine.

use thiserror::Error;

/// Hard failures returned by the engine and the registry
#[derive(Debug, Error)]
pub enum RetrieveError {
    /// No URL can be derived from the input and nothing is cached for it
    #[error("Cannot resolve '{input}': {reason}")]
    Resolution { input: String, reason: String },

    /// Registry lookup by an unregistered name
    #[error("Unknown retriever: {0}")]
    UnknownRetriever(String),

    /// Registration under a name that is already taken
    #[error("Retriever already registered: {0}")]
    DuplicateRetriever(String),

    /// A required or malformed retriever parameter
    #[error("Invalid configuration for {retriever}: {message}")]
    Configuration { retriever: String, message: String },

    /// The cache collaborator failed
    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl RetrieveError {
    pub(crate) fn resolution(input: &str, reason: impl Into<String>) -> Self {
        RetrieveError::Resolution {
            input: input.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn configuration(retriever: &str, message: impl Into<String>) -> Self {
        RetrieveError::Configuration {
            retriever: retriever.to_string(),
            message: message.into(),
        }
    }
}

/// Transport failure for a single item
#[derive(Debug, Error)]
pub enum FetchError {
    /// The URL could not be parsed or has no host
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Request timed out
    #[error("Request timed out")]
    Timeout,

    /// Failed to connect to server
    #[error("Failed to connect to server")]
    Connect(#[source] reqwest::Error),

    /// Server answered with a non-success status
    #[error("Unexpected HTTP status {status}")]
    Status { status: u16 },

    /// Other request error
    #[error("Request failed: {0}")]
    Request(String),

    /// A crawl service accepted the request but reported a failure
    #[error("Crawl service error: {0}")]
    Service(String),

    /// The worker handling this item stopped before reporting
    #[error("Fetch aborted before completion")]
    Aborted,
}

impl FetchError {
    /// Create an error from a reqwest error
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else if err.is_connect() {
            FetchError::Connect(err)
        } else if let Some(status) = err.status() {
            FetchError::Status {
                status: status.as_u16(),
            }
        } else {
            FetchError::Request(err.to_string())
        }
    }
}

/// Parser failure for otherwise successfully fetched content
#[derive(Debug, Error)]
pub enum ParseError {
    /// Expected element or field is not present
    #[error("Missing content: {0}")]
    MissingContent(String),

    /// Parser produced nothing
    #[error("Parser returned empty output")]
    Empty,

    /// Content could not be interpreted
    #[error("Invalid content: {0}")]
    Invalid(String),
}

/// Cache collaborator failure
#[derive(Debug, Error)]
pub enum CacheError {
    /// Underlying storage I/O failed
    #[error("Cache I/O error on '{key}'")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    /// Key would escape its namespace
    #[error("Invalid cache key: '{0}'")]
    InvalidKey(String),

    /// A stored record could not be decoded
    #[error("Corrupt cache entry '{key}': {message}")]
    Corrupt { key: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            RetrieveError::UnknownRetriever("nope".into()).to_string(),
            "Unknown retriever: nope"
        );
        assert_eq!(
            RetrieveError::resolution("1234", "no cache entry").to_string(),
            "Cannot resolve '1234': no cache entry"
        );
        assert_eq!(
            RetrieveError::configuration("page", "link_selector is required").to_string(),
            "Invalid configuration for page: link_selector is required"
        );
        assert_eq!(
            FetchError::Status { status: 503 }.to_string(),
            "Unexpected HTTP status 503"
        );
        assert_eq!(FetchError::Timeout.to_string(), "Request timed out");
        assert_eq!(
            CacheError::InvalidKey("../x".into()).to_string(),
            "Invalid cache key: '../x'"
        );
    }

    #[test]
    fn test_cache_error_converts() {
        let err: RetrieveError = CacheError::InvalidKey("a/b".into()).into();
        assert!(matches!(err, RetrieveError::Cache(CacheError::InvalidKey(_))));
    }
}
