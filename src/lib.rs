//! marketcache library
//!
//! A TTL response cache for public market-data APIs, plus the feed catalog
//! and command runner used by the `marketcache` binary.

pub mod cache;
pub mod cli;
pub mod commands;
pub mod error;
pub mod feeds;

pub use cache::ResponseCache;
pub use error::{CacheError, FetchFailure};
