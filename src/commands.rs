//! Runs a parsed `Action` against a `ResponseCache`
//!
//! Output goes to the supplied writer so the binary can print to stdout and
//! tests can capture into a buffer.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::de::IgnoredAny;
use std::io::{self, Write};
use thiserror::Error;

use crate::cache::{RecordInfo, ResponseCache, StoreError};
use crate::cli::Action;
use crate::error::CacheError;
use crate::feeds::{all_feeds, CoinChart, FeedRequest};

/// Errors that end a command with a non-zero exit status
#[derive(Debug, Error)]
pub enum CommandError {
    /// The fetch failed
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Reading or removing stored records failed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Writing to the output failed
    #[error("Failed to write output: {0}")]
    Output(#[from] io::Error),

    /// Some feeds could not be prefetched
    #[error("{failed} of {total} feeds failed to load")]
    WarmFailed { failed: usize, total: usize },
}

/// Executes `action`, writing human-readable results to `out`
pub async fn run<W: Write>(
    action: &Action,
    cache: &ResponseCache,
    out: &mut W,
) -> Result<(), CommandError> {
    match action {
        Action::Fetch(request) => fetch(cache, request, out).await,
        Action::ListFeeds => list_feeds(out),
        Action::Warm => warm(cache, out).await,
        Action::Inspect(key) => inspect(cache, key, out),
        Action::Evict(key) => {
            cache.evict(key)?;
            writeln!(out, "evicted {}", key)?;
            Ok(())
        }
        Action::Clear => {
            let removed = cache.clear()?;
            writeln!(out, "removed {} records", removed)?;
            Ok(())
        }
    }
}

async fn fetch<W: Write>(
    cache: &ResponseCache,
    request: &FeedRequest,
    out: &mut W,
) -> Result<(), CommandError> {
    let payload: serde_json::Value = cache
        .get_or_fetch(&request.key, &request.url, request.ttl_secs)
        .await?;
    writeln!(out, "{:#}", payload)?;
    Ok(())
}

fn list_feeds<W: Write>(out: &mut W) -> Result<(), CommandError> {
    for feed in all_feeds() {
        writeln!(
            out,
            "{:<16} {:<20} {:>5}s  {}",
            feed.name, feed.key, feed.ttl_secs, feed.description
        )?;
    }
    for chart in CoinChart::all() {
        writeln!(
            out,
            "{:<16} {:<20} {:>5}s  {}",
            format!("{} <coin>", chart.name()),
            "",
            chart.ttl_secs(),
            chart.description()
        )?;
    }
    Ok(())
}

/// Fetches every fixed-URL feed at once; payloads are decoded and dropped
async fn warm<W: Write>(cache: &ResponseCache, out: &mut W) -> Result<(), CommandError> {
    let feeds = all_feeds();
    let results = join_all(feeds.iter().map(|feed| async move {
        let result = cache
            .get_or_fetch::<IgnoredAny>(feed.key, feed.url, feed.ttl_secs)
            .await;
        (feed, result)
    }))
    .await;

    let mut failed = 0;
    for (feed, result) in results {
        match result {
            Ok(_) => writeln!(out, "ok    {} ({})", feed.name, feed.key)?,
            Err(e) => {
                failed += 1;
                tracing::warn!("warming {} failed: {}", feed.key, e);
                writeln!(out, "fail  {} ({}): {}", feed.name, feed.key, e)?;
            }
        }
    }

    if failed > 0 {
        return Err(CommandError::WarmFailed {
            failed,
            total: feeds.len(),
        });
    }
    Ok(())
}

fn inspect<W: Write>(cache: &ResponseCache, key: &str, out: &mut W) -> Result<(), CommandError> {
    match cache.peek(key)? {
        Some(info) => write_record_info(&info, out)?,
        None => writeln!(out, "no record for {}", key)?,
    }
    Ok(())
}

fn write_record_info<W: Write>(info: &RecordInfo, out: &mut W) -> io::Result<()> {
    let stored = DateTime::<Utc>::from_timestamp_millis(info.timestamp)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| info.timestamp.to_string());
    writeln!(out, "key:    {}", info.key)?;
    writeln!(out, "stored: {}", stored)?;
    writeln!(out, "age:    {}", format_age(info.age_millis))?;
    writeln!(out, "size:   {} bytes", info.size_bytes)
}

/// Formats an age like `1h 02m 03s`; negative ages come from clock skew
fn format_age(age_millis: i64) -> String {
    if age_millis < 0 {
        return "in the future".to_string();
    }
    let total = age_millis / 1000;
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{}h {:02}m {:02}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {:02}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{Fetcher, HttpResponse, KeyValueStore, ManualClock, MemoryStore};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const START: i64 = 1_700_000_000_000;

    /// Answers every URL with `{"url": <url>}`, or 500 for URLs containing "fees"
    #[derive(Default)]
    struct EchoFetcher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Fetcher for EchoFetcher {
        async fn get(&self, url: &str) -> Result<HttpResponse, CacheError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if url.contains("fees") {
                return Ok(HttpResponse::new(500, "unavailable"));
            }
            Ok(HttpResponse::new(200, serde_json::json!({ "url": url }).to_string()))
        }
    }

    fn setup() -> (ResponseCache, Arc<MemoryStore>, Arc<EchoFetcher>, ManualClock) {
        let store = Arc::new(MemoryStore::new());
        let fetcher = Arc::new(EchoFetcher::default());
        let clock = ManualClock::new(START);
        let cache = ResponseCache::new(store.clone(), fetcher.clone(), Arc::new(clock.clone()));
        (cache, store, fetcher, clock)
    }

    fn output(buf: Vec<u8>) -> String {
        String::from_utf8(buf).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_prints_pretty_payload() {
        let (cache, _store, _fetcher, _clock) = setup();
        let action = Action::Fetch(FeedRequest {
            key: "k".to_string(),
            url: "https://x.test/a".to_string(),
            ttl_secs: 60,
        });
        let mut buf = Vec::new();

        run(&action, &cache, &mut buf).await.unwrap();

        assert_eq!(output(buf), "{\n  \"url\": \"https://x.test/a\"\n}\n");
    }

    #[tokio::test]
    async fn test_fetch_error_is_returned() {
        let (cache, _store, _fetcher, _clock) = setup();
        let action = Action::Fetch(FeedRequest {
            key: "k".to_string(),
            url: "https://x.test/fees".to_string(),
            ttl_secs: 60,
        });
        let mut buf = Vec::new();

        let err = run(&action, &cache, &mut buf).await.unwrap_err();

        assert!(matches!(err, CommandError::Cache(CacheError::Http(_))));
        assert!(err.to_string().contains("500"));
    }

    #[tokio::test]
    async fn test_list_feeds_includes_every_feed() {
        let (cache, _store, _fetcher, _clock) = setup();
        let mut buf = Vec::new();

        run(&Action::ListFeeds, &cache, &mut buf).await.unwrap();

        let text = output(buf);
        for feed in all_feeds() {
            assert!(text.contains(feed.name));
            assert!(text.contains(feed.key));
        }
        assert!(text.contains("coin-chart-90d <coin>"));
    }

    #[tokio::test]
    async fn test_warm_reports_failures_and_caches_the_rest() {
        let (cache, store, fetcher, _clock) = setup();
        let mut buf = Vec::new();

        let err = run(&Action::Warm, &cache, &mut buf).await.unwrap_err();

        assert!(matches!(err, CommandError::WarmFailed { failed: 1, total: 9 }));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 9);
        let text = output(buf);
        assert!(text.contains("fail  fees (llama-fees)"));
        assert!(text.contains("ok    global (cg-global)"));
        assert!(store.get("cg-global").unwrap().is_some());
        assert!(store.get("llama-fees").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_warm_twice_only_refetches_failures() {
        let (cache, _store, fetcher, _clock) = setup();

        let _ = run(&Action::Warm, &cache, &mut Vec::new()).await;
        let _ = run(&Action::Warm, &cache, &mut Vec::new()).await;

        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn test_inspect_evict_clear() {
        let (cache, _store, _fetcher, clock) = setup();
        let _: serde_json::Value = cache.get_or_fetch("k", "https://x.test", 60).await.unwrap();
        clock.advance_secs(75);

        let mut buf = Vec::new();
        run(&Action::Inspect("k".to_string()), &cache, &mut buf).await.unwrap();
        let text = output(buf);
        assert!(text.contains("key:    k"));
        assert!(text.contains("stored: 2023-11-14T22:13:20+00:00"));
        assert!(text.contains("age:    1m 15s"));

        let mut buf = Vec::new();
        run(&Action::Evict("k".to_string()), &cache, &mut buf).await.unwrap();
        assert_eq!(output(buf), "evicted k\n");

        let mut buf = Vec::new();
        run(&Action::Inspect("k".to_string()), &cache, &mut buf).await.unwrap();
        assert_eq!(output(buf), "no record for k\n");

        let mut buf = Vec::new();
        run(&Action::Clear, &cache, &mut buf).await.unwrap();
        assert_eq!(output(buf), "removed 0 records\n");
    }

    #[test]
    fn test_format_age() {
        assert_eq!(format_age(0), "0s");
        assert_eq!(format_age(59_999), "59s");
        assert_eq!(format_age(61_000), "1m 01s");
        assert_eq!(format_age(3_723_000), "1h 02m 03s");
        assert_eq!(format_age(-5), "in the future");
    }
}
