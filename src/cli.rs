//! Command-line interface parsing for marketcache
//!
//! This module handles parsing of CLI arguments using clap and turns them
//! into a validated `StartupConfig` before any cache or network work starts.

use clap::{ArgAction, Parser, Subcommand};
use reqwest::Url;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::cache::{FetcherConfig, DEFAULT_TTL_SECS};
use crate::feeds::{self, FeedError, FeedRequest};

/// Error types for CLI argument validation
#[derive(Debug, Error)]
pub enum CliError {
    /// The cache key was empty
    #[error("Invalid key: cache keys must not be empty")]
    EmptyKey,

    /// The URL could not be parsed or is not http(s)
    #[error("Invalid URL: '{0}'. Expected an http:// or https:// URL")]
    InvalidUrl(String),

    /// A TTL of zero would never return a cached value
    #[error("Invalid ttl: must be at least 1 second")]
    InvalidTtl,

    /// A timeout of zero would fail every request
    #[error("Invalid timeout: must be at least 1 second")]
    InvalidTimeout,

    /// The feed name or coin id was rejected
    #[error(transparent)]
    Feed(#[from] FeedError),
}

/// marketcache - Cached access to public crypto and DeFi market-data APIs
#[derive(Parser, Debug)]
#[command(name = "marketcache")]
#[command(about = "TTL-cached access to public market-data APIs")]
#[command(version)]
pub struct Cli {
    /// Directory holding cached records (default: XDG cache directory)
    #[arg(long, value_name = "DIR", global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Share one request between concurrent lookups of the same key
    #[arg(long, global = true)]
    pub coalesce: bool,

    /// Abort HTTP requests that take longer than this many seconds
    #[arg(long, value_name = "SECS", global = true)]
    pub timeout_secs: Option<u64>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Fetch any JSON URL through the cache and print the payload
    ///
    /// Examples:
    ///   marketcache get cg-global https://api.coingecko.com/api/v3/global --ttl 120
    Get {
        /// Cache key identifying the resource and its query
        key: String,
        /// URL to GET when no fresh record exists
        url: String,
        /// Seconds a stored record stays fresh
        #[arg(long, default_value_t = DEFAULT_TTL_SECS)]
        ttl: u64,
    },

    /// Fetch a named feed through the cache and print the payload
    ///
    /// Examples:
    ///   marketcache feed global
    ///   marketcache feed coin-chart-90d tether
    Feed {
        /// Feed name (see `marketcache feeds`)
        name: String,
        /// CoinGecko coin id, for coin-chart feeds
        coin: Option<String>,
    },

    /// List the named feeds
    Feeds,

    /// Fetch every fixed-URL feed concurrently to fill the cache
    Warm,

    /// Show when a record was stored, without fetching
    Inspect {
        /// Cache key to inspect
        key: String,
    },

    /// Remove one stored record
    Evict {
        /// Cache key to remove
        key: String,
    },

    /// Remove every stored record
    Clear,
}

/// What to do once the cache is built
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Fetch through the cache and print the payload
    Fetch(FeedRequest),
    /// Print the feed catalog
    ListFeeds,
    /// Prefetch all fixed-URL feeds
    Warm,
    /// Print record metadata
    Inspect(String),
    /// Remove one record
    Evict(String),
    /// Remove all records
    Clear,
}

/// Configuration derived from CLI arguments for application startup
#[derive(Debug, Clone)]
pub struct StartupConfig {
    /// Custom cache directory, if any
    pub cache_dir: Option<PathBuf>,
    /// Whether concurrent same-key misses share one request
    pub coalesce: bool,
    /// HTTP client settings
    pub fetcher: FetcherConfig,
    /// Verbosity count from `-v`
    pub verbosity: u8,
    /// The command to run
    pub action: Action,
}

impl StartupConfig {
    /// Creates a StartupConfig from parsed CLI arguments.
    ///
    /// # Returns
    /// * `Ok(StartupConfig)` with validated settings
    /// * `Err(CliError)` if a key, URL, TTL, timeout or feed argument is invalid
    pub fn from_cli(cli: &Cli) -> Result<Self, CliError> {
        let timeout = match cli.timeout_secs {
            Some(0) => return Err(CliError::InvalidTimeout),
            Some(secs) => Some(Duration::from_secs(secs)),
            None => None,
        };

        let action = match &cli.command {
            Command::Get { key, url, ttl } => {
                if key.is_empty() {
                    return Err(CliError::EmptyKey);
                }
                if *ttl == 0 {
                    return Err(CliError::InvalidTtl);
                }
                validate_url(url)?;
                Action::Fetch(FeedRequest {
                    key: key.clone(),
                    url: url.clone(),
                    ttl_secs: *ttl,
                })
            }
            Command::Feed { name, coin } => Action::Fetch(feeds::resolve(name, coin.as_deref())?),
            Command::Feeds => Action::ListFeeds,
            Command::Warm => Action::Warm,
            Command::Inspect { key } => Action::Inspect(non_empty_key(key)?),
            Command::Evict { key } => Action::Evict(non_empty_key(key)?),
            Command::Clear => Action::Clear,
        };

        Ok(StartupConfig {
            cache_dir: cli.cache_dir.clone(),
            coalesce: cli.coalesce,
            fetcher: FetcherConfig {
                timeout,
                user_agent: Some(format!("marketcache/{}", env!("CARGO_PKG_VERSION"))),
            },
            verbosity: cli.verbose,
            action,
        })
    }

    /// Default tracing filter for the chosen verbosity
    ///
    /// Only applies when `RUST_LOG` is not set.
    pub fn log_filter(&self) -> &'static str {
        match self.verbosity {
            0 => "marketcache=warn",
            1 => "marketcache=info",
            2 => "marketcache=debug",
            _ => "marketcache=trace,reqwest=debug",
        }
    }
}

fn non_empty_key(key: &str) -> Result<String, CliError> {
    if key.is_empty() {
        Err(CliError::EmptyKey)
    } else {
        Ok(key.to_string())
    }
}

fn validate_url(url: &str) -> Result<(), CliError> {
    match Url::parse(url) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => Ok(()),
        _ => Err(CliError::InvalidUrl(url.to_string())),
    }
}
