//! Request lifecycle events.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

use crate::request::RequestMeta;

/// A step in a request's life, reported to every `RequestEventListener`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestEvent {
    Queued,
    CacheHit { fresh: bool },
    CacheMiss,
    /// Parked behind an identical in-flight request.
    Deduplicated,
    NetworkStarted { attempt: u32 },
    NetworkFinished {
        status: Option<u16>,
        elapsed: Duration,
    },
    Retried { attempt: u32 },
    Delivered { intermediate: bool },
    Failed { kind: &'static str },
    Cancelled,
    Finished,
}

/// Observer for request lifecycle events.
///
/// Called synchronously on whichever thread produced the event, so
/// implementations must be quick and must not call back into the queue.
pub trait RequestEventListener: Send + Sync {
    fn on_request_event(&self, request: &RequestMeta, event: &RequestEvent);
}

impl<F> RequestEventListener for F
where
    F: Fn(&RequestMeta, &RequestEvent) + Send + Sync,
{
    fn on_request_event(&self, request: &RequestMeta, event: &RequestEvent) {
        self(request, event)
    }
}

/// Running totals kept by every queue.
#[derive(Debug, Default)]
pub(crate) struct QueueCounters {
    added: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    deduplicated: AtomicU64,
    network_attempts: AtomicU64,
    retries: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    finished: AtomicU64,
}

impl QueueCounters {
    pub(crate) fn record(&self, event: &RequestEvent) {
        let counter = match event {
            RequestEvent::Queued => &self.added,
            RequestEvent::CacheHit { .. } => &self.cache_hits,
            RequestEvent::CacheMiss => &self.cache_misses,
            RequestEvent::Deduplicated => &self.deduplicated,
            RequestEvent::NetworkStarted { .. } => &self.network_attempts,
            RequestEvent::Retried { .. } => &self.retries,
            RequestEvent::Delivered { intermediate: false } => &self.delivered,
            RequestEvent::Failed { .. } => &self.failed,
            RequestEvent::Cancelled => &self.cancelled,
            RequestEvent::Finished => &self.finished,
            RequestEvent::Delivered { intermediate: true }
            | RequestEvent::NetworkFinished { .. } => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            added: self.added.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            deduplicated: self.deduplicated.load(Ordering::Relaxed),
            network_attempts: self.network_attempts.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            finished: self.finished.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of a queue's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub added: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub deduplicated: u64,
    pub network_attempts: u64,
    pub retries: u64,
    pub delivered: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub finished: u64,
}
