//! marketcache - Fetch public market-data APIs through a persistent TTL cache
//!
//! Payloads go to stdout; logs go to stderr so output can be piped into other
//! tools.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use marketcache::cache::{FileStore, HttpFetcher, ResponseCache, SystemClock};
use marketcache::cli::{Cli, StartupConfig};
use marketcache::commands;

/// Builds the cache from the startup configuration
fn build_cache(config: &StartupConfig) -> Result<ResponseCache, Box<dyn std::error::Error>> {
    let store = match &config.cache_dir {
        Some(dir) => FileStore::with_dir(dir.clone()),
        None => FileStore::new().ok_or("could not determine a cache directory; pass --cache-dir")?,
    };
    tracing::debug!("using cache directory {}", store.dir().display());

    let fetcher = HttpFetcher::from_config(&config.fetcher)?;

    Ok(ResponseCache::new(Arc::new(store), Arc::new(fetcher), Arc::new(SystemClock))
        .coalescing(config.coalesce))
}

async fn run(config: StartupConfig) -> Result<(), Box<dyn std::error::Error>> {
    let cache = build_cache(&config)?;
    let mut stdout = std::io::stdout().lock();
    commands::run(&config.action, &cache, &mut stdout).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match StartupConfig::from_cli(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::from(2);
        }
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.log_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}
