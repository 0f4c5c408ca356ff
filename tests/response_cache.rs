//! Integration tests for `ResponseCache` through the public API
//!
//! Uses a file-backed store in a temp directory to check that records persist
//! across cache instances, and a counting fetcher in place of the network.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tempfile::TempDir;

use marketcache::cache::{
    CacheRecord, Fetcher, FileStore, HttpResponse, KeyValueStore, ManualClock, ResponseCache,
};
use marketcache::CacheError;

const START: i64 = 1_700_000_000_000;

#[derive(Debug, Deserialize, PartialEq)]
struct Global {
    data: GlobalData,
}

#[derive(Debug, Deserialize, PartialEq)]
struct GlobalData {
    markets: u32,
}

/// Returns `{"data": {"markets": n}}` where n counts requests so far
#[derive(Default)]
struct CountingFetcher {
    calls: AtomicUsize,
}

impl CountingFetcher {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for CountingFetcher {
    async fn get(&self, _url: &str) -> Result<HttpResponse, CacheError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(HttpResponse::new(200, format!(r#"{{"data":{{"markets":{}}}}}"#, n)))
    }
}

fn file_cache(dir: &TempDir, fetcher: Arc<CountingFetcher>, clock: &ManualClock) -> ResponseCache {
    let store = FileStore::with_dir(dir.path().to_path_buf());
    ResponseCache::new(Arc::new(store), fetcher, Arc::new(clock.clone()))
}

#[tokio::test]
async fn test_two_calls_within_ttl_then_one_after() {
    let dir = TempDir::new().expect("Failed to create temp directory");
    let fetcher = Arc::new(CountingFetcher::default());
    let clock = ManualClock::new(START);
    let cache = file_cache(&dir, fetcher.clone(), &clock);
    let url = "https://api.example.com/global";

    let first: Global = cache.get_or_fetch("cg-global", url, 120).await.unwrap();
    clock.advance_secs(60);
    let second: Global = cache.get_or_fetch("cg-global", url, 120).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(fetcher.calls(), 1);

    clock.advance_secs(61);
    let third: Global = cache.get_or_fetch("cg-global", url, 120).await.unwrap();
    assert_eq!(third.data.markets, 2);
    assert_eq!(fetcher.calls(), 2);
}

#[tokio::test]
async fn test_records_survive_a_new_cache_instance() {
    let dir = TempDir::new().expect("Failed to create temp directory");
    let clock = ManualClock::new(START);

    let first_fetcher = Arc::new(CountingFetcher::default());
    let first = file_cache(&dir, first_fetcher.clone(), &clock);
    let _: Global = first.get_or_fetch("llama-chains", "https://x/chains", 3600).await.unwrap();
    drop(first);

    let second_fetcher = Arc::new(CountingFetcher::default());
    let second = file_cache(&dir, second_fetcher.clone(), &clock);
    clock.advance_secs(600);
    let cached: Global = second.get_or_fetch("llama-chains", "https://x/chains", 3600).await.unwrap();

    assert_eq!(cached.data.markets, 1);
    assert_eq!(second_fetcher.calls(), 0);
}

#[tokio::test]
async fn test_corrupt_file_is_rewritten() {
    let dir = TempDir::new().expect("Failed to create temp directory");
    let path = FileStore::with_dir(dir.path().to_path_buf()).cache_path("cg-derivatives");
    std::fs::write(path, "\u{0}\u{1}truncated").unwrap();
    let fetcher = Arc::new(CountingFetcher::default());
    let clock = ManualClock::new(START);
    let cache = file_cache(&dir, fetcher.clone(), &clock);

    let data: Global = cache.get_or_fetch("cg-derivatives", "https://x/d", 3600).await.unwrap();
    assert_eq!(data.data.markets, 1);

    let store = FileStore::with_dir(dir.path().to_path_buf());
    let raw = store.get("cg-derivatives").unwrap().unwrap();
    let record: CacheRecord<serde_json::Value> = serde_json::from_str(&raw).unwrap();
    assert_eq!(record.timestamp, START);
    assert_eq!(record.data, serde_json::json!({"data": {"markets": 1}}));
}

#[tokio::test]
async fn test_keys_with_separators_stay_inside_cache_dir() {
    let dir = TempDir::new().expect("Failed to create temp directory");
    let fetcher = Arc::new(CountingFetcher::default());
    let clock = ManualClock::new(START);
    let cache = file_cache(&dir, fetcher.clone(), &clock);

    let _: Global = cache.get_or_fetch("../outside", "https://x", 60).await.unwrap();

    assert!(!dir.path().parent().unwrap().join("outside.json").exists());
    assert_eq!(cache.keys().unwrap(), vec!["../outside".to_string()]);
}

#[tokio::test]
async fn test_long_key_is_cached_like_any_other() {
    let dir = TempDir::new().expect("Failed to create temp directory");
    let fetcher = Arc::new(CountingFetcher::default());
    let clock = ManualClock::new(START);
    let cache = file_cache(&dir, fetcher.clone(), &clock);
    let key = format!("cg-markets?ids={}", "usd-coin,".repeat(30));
    assert!(key.len() > 280);

    for _ in 0..3 {
        let data: Global = cache.get_or_fetch(&key, "https://x/markets", 600).await.unwrap();
        assert_eq!(data.data.markets, 1);
    }

    assert_eq!(fetcher.calls(), 1);
    assert_eq!(cache.keys().unwrap(), vec![key.clone()]);
    assert_eq!(cache.clear().unwrap(), 1);
    assert!(cache.keys().unwrap().is_empty());
}

#[tokio::test]
async fn test_clear_leaves_foreign_files_alone() {
    let dir = TempDir::new().expect("Failed to create temp directory");
    std::fs::write(dir.path().join("package.json"), r#"{"name":"dashboard"}"#).unwrap();
    let fetcher = Arc::new(CountingFetcher::default());
    let clock = ManualClock::new(START);
    let cache = file_cache(&dir, fetcher.clone(), &clock);
    let _: Global = cache.get_or_fetch("cg-global", "https://x/global", 60).await.unwrap();

    assert_eq!(cache.keys().unwrap(), vec!["cg-global".to_string()]);
    assert_eq!(cache.clear().unwrap(), 1);

    let kept = std::fs::read_to_string(dir.path().join("package.json")).unwrap();
    assert_eq!(kept, r#"{"name":"dashboard"}"#);
}
