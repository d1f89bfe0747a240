//! Response cache.
//!
//! The dispatch core only depends on the freshness model of `Entry` and on
//! the `Cache` contract; storage lives in `MemoryCache` / `DiskCache`.

mod disk;
mod headers;
mod memory;

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::CacheError;
use crate::http::Headers;

pub use disk::{DiskCache, DiskCacheConfig};
pub use headers::{parse_cache_headers, CacheDefaults};
pub use memory::{MemoryCache, MemoryCacheConfig};

/// Default byte budget for the bundled caches.
pub const DEFAULT_MAX_BYTES: usize = 5 * 1024 * 1024;

/// Longest lifetime given to a cached response: 2^31 seconds, the
/// delta-seconds ceiling of RFC 9111.
pub(crate) const MAX_LIFETIME_SECS: u64 = 1 << 31;

/// `from + delta` with `delta` capped at `MAX_LIFETIME_SECS`.
pub(crate) fn expiry_after(from: SystemTime, delta: Duration) -> SystemTime {
    let delta = delta.min(Duration::from_secs(MAX_LIFETIME_SECS));
    from.checked_add(delta).unwrap_or(from)
}

/// Fraction of the budget pruning brings the cache down to.
pub(crate) const HYSTERESIS_FACTOR: f64 = 0.9;

/// Where an entry stands relative to its soft and hard expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Before the soft expiry: serve without touching the network.
    Fresh,
    /// Past the soft expiry but before the hard one: serve, then refresh.
    SoftStale,
    /// Past the hard expiry: must not satisfy a request on its own.
    HardStale,
}

/// Cached raw response data for one cache key.
///
/// Expiry times are absolute. Construction keeps `soft_ttl <= ttl`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub data: Vec<u8>,
    pub etag: Option<String>,
    pub server_date: Option<SystemTime>,
    pub last_modified: Option<SystemTime>,
    pub response_headers: Headers,
    soft_ttl: SystemTime,
    ttl: SystemTime,
}

impl Entry {
    pub fn new(data: Vec<u8>, soft_ttl: SystemTime, ttl: SystemTime) -> Self {
        Self {
            data,
            etag: None,
            server_date: None,
            last_modified: None,
            response_headers: Headers::new(),
            soft_ttl: soft_ttl.min(ttl),
            ttl,
        }
    }

    /// Entry that turns soft-stale after `soft` and hard-stale after `hard`.
    pub fn expiring_in(data: Vec<u8>, soft: Duration, hard: Duration) -> Self {
        let now = SystemTime::now();
        Self::new(data, expiry_after(now, soft), expiry_after(now, hard))
    }

    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.response_headers = headers;
        self
    }

    pub fn soft_ttl(&self) -> SystemTime {
        self.soft_ttl
    }

    pub fn ttl(&self) -> SystemTime {
        self.ttl
    }

    /// Move both expiry times, keeping the ordering invariant.
    pub fn set_expiry(&mut self, soft_ttl: SystemTime, ttl: SystemTime) {
        self.ttl = ttl;
        self.soft_ttl = soft_ttl.min(ttl);
    }

    /// Force the entry stale; `full_expire` also passes the hard expiry.
    pub fn expire(&mut self, full_expire: bool) {
        self.soft_ttl = UNIX_EPOCH;
        if full_expire {
            self.ttl = UNIX_EPOCH;
        }
    }

    pub fn is_expired(&self, now: SystemTime) -> bool {
        self.ttl <= now
    }

    pub fn refresh_needed(&self, now: SystemTime) -> bool {
        self.soft_ttl <= now
    }

    pub fn freshness(&self, now: SystemTime) -> Freshness {
        if self.is_expired(now) {
            Freshness::HardStale
        } else if self.refresh_needed(now) {
            Freshness::SoftStale
        } else {
            Freshness::Fresh
        }
    }

    /// Approximate in-memory footprint used for cache budgeting.
    pub fn size_bytes(&self) -> usize {
        let headers: usize = self
            .response_headers
            .iter()
            .map(|h| h.name.len() + h.value.len())
            .sum();
        self.data.len() + headers + self.etag.as_ref().map_or(0, String::len)
    }
}

/// Key/value store of cache entries. Implementations must be thread-safe.
pub trait Cache: Send + Sync {
    /// One-time blocking setup (e.g. loading a persisted index).
    fn initialize(&self) -> Result<(), CacheError>;

    fn get(&self, key: &str) -> Option<Arc<Entry>>;

    fn put(&self, key: &str, entry: Entry);

    fn remove(&self, key: &str);

    fn clear(&self);

    /// Mark an entry stale without dropping its bytes.
    fn invalidate(&self, key: &str, full_expire: bool) {
        if let Some(entry) = self.get(key) {
            let mut entry = (*entry).clone();
            entry.expire(full_expire);
            self.put(key, entry);
        }
    }
}

/// Cache that stores nothing; every lookup misses.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCache;

impl Cache for NoCache {
    fn initialize(&self) -> Result<(), CacheError> {
        Ok(())
    }

    fn get(&self, _key: &str) -> Option<Arc<Entry>> {
        None
    }

    fn put(&self, _key: &str, _entry: Entry) {}

    fn remove(&self, _key: &str) {}

    fn clear(&self) {}
}
