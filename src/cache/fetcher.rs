//! HTTP GET abstraction used on cache misses
//!
//! The cache only needs status, reason phrase and body text, so the seam is
//! a single `get` call. `HttpFetcher` is the reqwest-backed implementation.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use crate::error::CacheError;

/// Raw outcome of a GET request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP status code
    pub status: u16,
    /// Reason phrase for the status, empty if unknown
    pub status_text: String,
    /// Response body text
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        let status_text = reqwest::StatusCode::from_u16(status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or_default()
            .to_string();
        Self {
            status,
            status_text,
            body: body.into(),
        }
    }

    /// Whether the status is in the 2xx range
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Performs GET requests for the cache
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetches `url`, returning the response whatever its status
    ///
    /// Only transport-level failures are errors; a 404 is a successful
    /// `HttpResponse` with `status == 404`.
    async fn get(&self, url: &str) -> Result<HttpResponse, CacheError>;
}

/// Settings for the reqwest client behind `HttpFetcher`
#[derive(Debug, Clone, Default)]
pub struct FetcherConfig {
    /// Overall request timeout; `None` leaves reqwest's default (no timeout)
    pub timeout: Option<Duration>,
    /// User-Agent header; `None` sends reqwest's default
    pub user_agent: Option<String>,
}

/// Fetcher backed by a shared `reqwest::Client`
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpFetcher {
    /// Create a new HttpFetcher with default settings
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    /// Build the underlying client from `config`
    pub fn from_config(config: &FetcherConfig) -> Result<Self, reqwest::Error> {
        let mut builder = Client::builder().use_rustls_tls();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.as_str());
        }
        Ok(Self {
            client: builder.build()?,
        })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn get(&self, url: &str) -> Result<HttpResponse, CacheError> {
        let request_error = |source: reqwest::Error| CacheError::Request {
            url: url.to_string(),
            source,
        };

        let response = self.client.get(url).send().await.map_err(request_error)?;
        let status = response.status();
        let body = response.text().await.map_err(request_error)?;

        Ok(HttpResponse {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            body,
        })
    }
}
