//! The persisted unit of the cache
//!
//! Records are stored as `{"data": <payload>, "timestamp": <epoch millis>}`.

use serde::{Deserialize, Serialize};

/// A cached payload together with the moment it was written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord<T> {
    /// The response body, opaque to the cache
    pub data: T,
    /// When the record was written, in milliseconds since the Unix epoch
    pub timestamp: i64,
}

impl<T> CacheRecord<T> {
    pub fn new(data: T, timestamp: i64) -> Self {
        Self { data, timestamp }
    }

    /// Milliseconds elapsed between the write and `now_ms`
    ///
    /// Negative when the record claims to come from the future.
    pub fn age_millis(&self, now_ms: i64) -> i64 {
        now_ms.saturating_sub(self.timestamp)
    }

    /// Whether the record is still usable under the caller's TTL
    ///
    /// Freshness is decided by the TTL passed on each read, not by anything
    /// stored with the record.
    pub fn is_fresh(&self, now_ms: i64, ttl_secs: u64) -> bool {
        let window = i64::try_from(ttl_secs)
            .unwrap_or(i64::MAX)
            .saturating_mul(1000);
        self.age_millis(now_ms) < window
    }
}
