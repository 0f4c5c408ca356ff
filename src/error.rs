//! Error types surfaced by the response cache
//!
//! Only failures that prevent a payload from reaching the caller live here.
//! Storage problems (corrupt records, failed writes) are absorbed by the cache
//! and never appear as a `CacheError`.

use thiserror::Error;

/// A non-2xx response from the upstream API
///
/// Carries the request URL, status and response body so the caller can decide
/// whether to retry or back off. The cache never retries on its own.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("API request failed for {url}: {status} {status_text} - {body}")]
pub struct FetchFailure {
    /// URL that was requested
    pub url: String,
    /// HTTP status code
    pub status: u16,
    /// Canonical reason phrase for the status (e.g. "Not Found")
    pub status_text: String,
    /// Response body text, possibly empty
    pub body: String,
}

/// Errors returned from `ResponseCache::get_or_fetch`
#[derive(Debug, Error)]
pub enum CacheError {
    /// The cache key was empty
    #[error("Cache key must not be empty")]
    InvalidKey,

    /// The HTTP request could not be completed (DNS, TLS, connection reset, ...)
    #[error("HTTP request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The upstream API answered with a non-success status
    #[error(transparent)]
    Http(#[from] FetchFailure),

    /// The response body was not valid JSON for the expected payload type
    #[error("Failed to parse response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

impl CacheError {
    /// HTTP status code of the failed request, if the upstream answered at all
    pub fn status(&self) -> Option<u16> {
        match self {
            CacheError::Http(failure) => Some(failure.status),
            CacheError::Request { source, .. } => source.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
