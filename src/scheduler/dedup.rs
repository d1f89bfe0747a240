//! In-flight request deduplication.
//!
//! The first cacheable request for a cache key becomes the leader and goes
//! to the network. Identical requests that arrive while it is in flight are
//! parked here and answered from the leader's response.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::request::QueuedRequest;

struct Waiting {
    leader: u64,
    waiters: VecDeque<Arc<dyn QueuedRequest>>,
}

/// Leader hand-off result.
pub(crate) struct Promotion {
    pub leader: Option<Arc<dyn QueuedRequest>>,
    /// Cancelled waiters skipped on the way; the caller finishes them.
    pub skipped: Vec<Arc<dyn QueuedRequest>>,
}

#[derive(Default)]
pub(crate) struct WaitingTable {
    keys: Mutex<HashMap<String, Waiting>>,
}

impl WaitingTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register `request` as leader for its key, or park it behind the
    /// current leader. Returns true if parked.
    pub(crate) fn park_or_lead(&self, request: &Arc<dyn QueuedRequest>) -> bool {
        let meta = request.meta();
        let sequence = meta.sequence().unwrap_or_default();
        let mut keys = self.keys.lock();
        match keys.get_mut(meta.cache_key()) {
            Some(waiting) if waiting.leader != sequence => {
                waiting.waiters.push_back(Arc::clone(request));
                true
            }
            Some(_) => false,
            None => {
                keys.insert(
                    meta.cache_key().to_string(),
                    Waiting {
                        leader: sequence,
                        waiters: VecDeque::new(),
                    },
                );
                false
            }
        }
    }

    /// Release the key and return everyone parked behind `leader`.
    ///
    /// Returns nothing if `leader` does not lead `key`.
    pub(crate) fn take_waiters(&self, key: &str, leader: u64) -> Vec<Arc<dyn QueuedRequest>> {
        let mut keys = self.keys.lock();
        match keys.get(key) {
            Some(waiting) if waiting.leader == leader => keys
                .remove(key)
                .map(|w| w.waiters.into_iter().collect())
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    }

    /// The leader dropped out without a result: hand the key to the oldest
    /// live waiter, or release it if none remain.
    pub(crate) fn promote_next(&self, key: &str, leader: u64) -> Promotion {
        let mut promotion = Promotion {
            leader: None,
            skipped: Vec::new(),
        };
        let mut keys = self.keys.lock();
        let Some(waiting) = keys.get_mut(key).filter(|w| w.leader == leader) else {
            return promotion;
        };
        while let Some(next) = waiting.waiters.pop_front() {
            if next.meta().is_cancelled() {
                promotion.skipped.push(next);
                continue;
            }
            waiting.leader = next.meta().sequence().unwrap_or_default();
            promotion.leader = Some(next);
            return promotion;
        }
        keys.remove(key);
        promotion
    }

    /// Number of keys with a request in flight.
    pub(crate) fn len(&self) -> usize {
        self.keys.lock().len()
    }

    /// Number of parked requests across all keys.
    pub(crate) fn waiter_count(&self) -> usize {
        self.keys.lock().values().map(|w| w.waiters.len()).sum()
    }
}
