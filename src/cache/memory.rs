//! In-memory response cache.
//!
//! Uses DashMap for concurrent access; a byte budget with least-recently-used
//! eviction keeps memory bounded. A slot's size is added to the byte count
//! before the slot becomes visible and subtracted only by whoever removes
//! it, so the count never drops below the bytes actually stored.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use super::{Cache, Entry, DEFAULT_MAX_BYTES, HYSTERESIS_FACTOR};
use crate::error::CacheError;

/// Configuration for the in-memory cache.
#[derive(Debug, Clone)]
pub struct MemoryCacheConfig {
    pub max_bytes: usize,
}

impl Default for MemoryCacheConfig {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_BYTES,
        }
    }
}

struct Slot {
    entry: Arc<Entry>,
    size: usize,
    last_access: AtomicU64,
}

/// Concurrent in-memory cache with a byte budget.
pub struct MemoryCache {
    entries: DashMap<String, Slot>,
    total_bytes: AtomicUsize,
    clock: AtomicU64,
    config: MemoryCacheConfig,
}

impl MemoryCache {
    pub fn new(config: MemoryCacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            total_bytes: AtomicUsize::new(0),
            clock: AtomicU64::new(0),
            config,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes.load(Ordering::Acquire)
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    fn remove_slot(&self, key: &str) {
        if let Some((_, slot)) = self.entries.remove(key) {
            self.total_bytes.fetch_sub(slot.size, Ordering::AcqRel);
        }
    }

    /// Evict least recently used entries until `needed` more bytes fit
    /// under the hysteresis mark.
    fn prune_if_needed(&self, needed: usize) {
        if self.total_bytes().saturating_add(needed) <= self.config.max_bytes {
            return;
        }
        let target = (self.config.max_bytes as f64 * HYSTERESIS_FACTOR) as usize;
        let mut by_age: Vec<(u64, String)> = self
            .entries
            .iter()
            .map(|e| (e.last_access.load(Ordering::Relaxed), e.key().clone()))
            .collect();
        by_age.sort_unstable();

        let mut pruned = 0usize;
        for (_, key) in by_age {
            if self.total_bytes().saturating_add(needed) < target {
                break;
            }
            self.remove_slot(&key);
            pruned += 1;
        }
        tracing::debug!(pruned, total_bytes = self.total_bytes(), "memory cache pruned");
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(MemoryCacheConfig::default())
    }
}

impl Cache for MemoryCache {
    fn initialize(&self) -> Result<(), CacheError> {
        Ok(())
    }

    fn get(&self, key: &str) -> Option<Arc<Entry>> {
        let slot = self.entries.get(key)?;
        slot.last_access.store(self.tick(), Ordering::Relaxed);
        Some(Arc::clone(&slot.entry))
    }

    fn put(&self, key: &str, entry: Entry) {
        let size = entry.size_bytes();
        if size > self.config.max_bytes {
            tracing::debug!(key, size, "entry larger than cache budget, not stored");
            self.remove_slot(key);
            return;
        }
        self.remove_slot(key);
        self.prune_if_needed(size);
        let slot = Slot {
            entry: Arc::new(entry),
            size,
            last_access: AtomicU64::new(self.tick()),
        };
        self.total_bytes.fetch_add(size, Ordering::AcqRel);
        if let Some(old) = self.entries.insert(key.to_string(), slot) {
            self.total_bytes.fetch_sub(old.size, Ordering::AcqRel);
        }
    }

    fn remove(&self, key: &str) {
        self.remove_slot(key);
    }

    fn clear(&self) {
        self.entries.retain(|_, slot| {
            self.total_bytes.fetch_sub(slot.size, Ordering::AcqRel);
            false
        });
    }
}
