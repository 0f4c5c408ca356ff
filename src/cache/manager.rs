//! TTL response cache in front of HTTP GET
//!
//! `ResponseCache::get_or_fetch` returns a stored payload while it is fresh
//! under the caller's TTL, and otherwise fetches, stores and returns a new one.
//! Storage is best-effort: corrupt records are discarded and failed writes are
//! logged, so the cache is never the reason a reachable resource fails to load.

use serde::de::{DeserializeOwned, IgnoredAny};
use serde_json::value::RawValue;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::clock::{Clock, SystemClock};
use super::fetcher::{Fetcher, HttpFetcher};
use super::record::CacheRecord;
use super::store::{FileStore, KeyValueStore, StoreError};
use crate::error::{CacheError, FetchFailure};

/// TTL used by `get_or_fetch_default`
pub const DEFAULT_TTL_SECS: u64 = 60;

/// Per-key locks for coalescing concurrent misses
type KeyLocks = Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

/// Metadata about a stored record, read without fetching
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordInfo {
    /// Cache key the record is stored under
    pub key: String,
    /// When the record was written, in epoch milliseconds
    pub timestamp: i64,
    /// Age of the record at the time of the peek, in milliseconds
    pub age_millis: i64,
    /// Size of the stored text in bytes
    pub size_bytes: usize,
}

/// Caches JSON responses by caller-chosen key
///
/// Cloning is cheap; clones share the store, fetcher, clock and in-flight
/// lock table.
#[derive(Clone)]
pub struct ResponseCache {
    store: Arc<dyn KeyValueStore>,
    fetcher: Arc<dyn Fetcher>,
    clock: Arc<dyn Clock>,
    /// Present only when same-key coalescing is enabled
    in_flight: Option<Arc<KeyLocks>>,
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("coalescing", &self.in_flight.is_some())
            .finish_non_exhaustive()
    }
}

impl ResponseCache {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        fetcher: Arc<dyn Fetcher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            fetcher,
            clock,
            in_flight: None,
        }
    }

    /// File-backed store in the XDG cache directory, reqwest fetcher, wall clock
    ///
    /// Returns `None` if the cache directory cannot be determined.
    pub fn with_defaults() -> Option<Self> {
        let store = FileStore::new()?;
        Some(Self::new(
            Arc::new(store),
            Arc::new(HttpFetcher::new()),
            Arc::new(SystemClock),
        ))
    }

    /// Enables or disables coalescing of concurrent same-key misses
    ///
    /// When enabled, a miss waits for any in-progress fetch of the same key
    /// and then re-reads the store before fetching itself. When disabled, every
    /// concurrent miss fetches independently and the last write wins.
    pub fn coalescing(mut self, enabled: bool) -> Self {
        self.in_flight = enabled.then(|| Arc::new(Mutex::new(HashMap::new())));
        self
    }

    pub fn is_coalescing(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Returns the payload for `key`, fetching `url` if no fresh record exists
    ///
    /// # Arguments
    /// * `key` - Non-empty key identifying the resource and its query parameters
    /// * `url` - Resource to GET on a miss
    /// * `ttl_secs` - How old a stored record may be and still be returned
    ///
    /// # Returns
    /// * `Ok(T)` - A fresh cached payload or a just-fetched one
    /// * `Err(CacheError)` - Empty key, transport failure, non-2xx status, or
    ///   a body that does not decode as `T`. Nothing is stored on error.
    pub async fn get_or_fetch<T: DeserializeOwned>(
        &self,
        key: &str,
        url: &str,
        ttl_secs: u64,
    ) -> Result<T, CacheError> {
        if key.is_empty() {
            return Err(CacheError::InvalidKey);
        }

        if let Some(data) = self.read_fresh(key, ttl_secs) {
            return Ok(data);
        }

        let Some(in_flight) = &self.in_flight else {
            return self.fetch_and_store(key, url).await;
        };

        // Declared before the guard so the guard is dropped first
        let slot = KeySlot::acquire(in_flight, key);
        let _guard = slot.lock.lock().await;

        // Another caller may have written the record while we waited
        match self.read_fresh(key, ttl_secs) {
            Some(data) => Ok(data),
            None => self.fetch_and_store(key, url).await,
        }
    }

    /// `get_or_fetch` with the default 60 second TTL
    pub async fn get_or_fetch_default<T: DeserializeOwned>(
        &self,
        key: &str,
        url: &str,
    ) -> Result<T, CacheError> {
        self.get_or_fetch(key, url, DEFAULT_TTL_SECS).await
    }

    /// Reports when the record for `key` was written, without fetching
    ///
    /// Returns `Ok(None)` for a missing or unreadable record. Unlike
    /// `get_or_fetch`, a corrupt record is left in place.
    pub fn peek(&self, key: &str) -> Result<Option<RecordInfo>, StoreError> {
        let Some(raw) = self.store.get(key)? else {
            return Ok(None);
        };

        match serde_json::from_str::<CacheRecord<IgnoredAny>>(&raw) {
            Ok(record) => Ok(Some(RecordInfo {
                key: key.to_string(),
                timestamp: record.timestamp,
                age_millis: record.age_millis(self.clock.now_millis()),
                size_bytes: raw.len(),
            })),
            Err(e) => {
                tracing::warn!("cache record for {} is unreadable: {}", key, e);
                Ok(None)
            }
        }
    }

    /// Lists every key currently held by the store
    pub fn keys(&self) -> Result<Vec<String>, StoreError> {
        self.store.keys()
    }

    /// Removes the record for `key`
    pub fn evict(&self, key: &str) -> Result<(), StoreError> {
        self.store.remove(key)
    }

    /// Removes every stored record, returning how many were removed
    pub fn clear(&self) -> Result<usize, StoreError> {
        let keys = self.store.keys()?;
        for key in &keys {
            self.store.remove(key)?;
        }
        Ok(keys.len())
    }

    /// Reads the record for `key` if it exists, decodes, and is fresh
    ///
    /// A record that fails to decode is removed. Store read errors count as a
    /// miss.
    fn read_fresh<T: DeserializeOwned>(&self, key: &str, ttl_secs: u64) -> Option<T> {
        let raw = match self.store.get(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                tracing::debug!("cache miss for {}", key);
                return None;
            }
            Err(e) => {
                tracing::warn!("failed to read cache for {}: {}", key, e);
                return None;
            }
        };

        let record = match serde_json::from_str::<CacheRecord<T>>(&raw) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!("discarding corrupt cache record for {}: {}", key, e);
                if let Err(e) = self.store.remove(key) {
                    tracing::warn!("failed to remove corrupt cache record for {}: {}", key, e);
                }
                return None;
            }
        };

        if record.is_fresh(self.clock.now_millis(), ttl_secs) {
            tracing::debug!("cache hit for {}", key);
            Some(record.data)
        } else {
            tracing::debug!("cache stale for {} (ttl {}s)", key, ttl_secs);
            None
        }
    }

    async fn fetch_and_store<T: DeserializeOwned>(
        &self,
        key: &str,
        url: &str,
    ) -> Result<T, CacheError> {
        tracing::debug!("fetching {} for {}", url, key);
        let response = self.fetcher.get(url).await?;

        if !response.is_success() {
            return Err(FetchFailure {
                url: url.to_string(),
                status: response.status,
                status_text: response.status_text,
                body: response.body,
            }
            .into());
        }

        let data: T = serde_json::from_str(&response.body).map_err(|source| CacheError::Decode {
            url: url.to_string(),
            source,
        })?;

        self.store_body(key, &response.body);
        Ok(data)
    }

    /// Writes the response body verbatim as a new record; failures are logged
    fn store_body(&self, key: &str, body: &str) {
        let result = serde_json::from_str::<&RawValue>(body)
            .map(|payload| CacheRecord::new(payload, self.clock.now_millis()))
            .and_then(|record| serde_json::to_string(&record));

        let encoded = match result {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::warn!("failed to encode cache record for {}: {}", key, e);
                return;
            }
        };

        if let Err(e) = self.store.set(key, &encoded) {
            tracing::warn!("failed to write cache for {}: {}", key, e);
        }
    }
}

/// A caller's share of one key's lock in the in-flight table
///
/// Dropping the slot releases the share and removes the table entry once no
/// caller holds one, on every exit path including a cancelled future.
struct KeySlot<'a> {
    table: &'a KeyLocks,
    key: &'a str,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl<'a> KeySlot<'a> {
    fn acquire(table: &'a KeyLocks, key: &'a str) -> Self {
        let mut locks = table.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let lock = locks.entry(key.to_string()).or_default().clone();
        Self { table, key, lock }
    }
}

impl Drop for KeySlot<'_> {
    fn drop(&mut self) {
        let mut locks = self.table.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        // Shares are only cloned and dropped under the table lock, so the
        // count is exact here
        drop(std::mem::take(&mut self.lock));
        if locks.get(self.key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(self.key);
        }
    }
}
