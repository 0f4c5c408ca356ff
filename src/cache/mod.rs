//! Cache module for storing API responses between runs
//!
//! `ResponseCache` sits in front of HTTP GET: callers supply a key, a URL and
//! a TTL, and get back either a fresh stored payload or a just-fetched one.
//! Storage, fetching and time are injected through the `KeyValueStore`,
//! `Fetcher` and `Clock` traits so the cache can run against files and the
//! network in production and against in-memory fakes in tests.

mod clock;
mod fetcher;
mod manager;
mod record;
mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use fetcher::{Fetcher, FetcherConfig, HttpFetcher, HttpResponse};
pub use manager::{RecordInfo, ResponseCache, DEFAULT_TTL_SECS};
pub use record::CacheRecord;
pub use store::{FileStore, KeyValueStore, MemoryStore, StoreError};
