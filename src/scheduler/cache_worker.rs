//! Cache dispatcher: triage requests against the cache.
//!
//! Fresh hits are delivered directly. Soft-stale hits are delivered as an
//! intermediate result and then refreshed. Misses and hard-stale entries go
//! to the network (or wait behind an identical in-flight request).

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::SystemTime;

use super::events::RequestEvent;
use super::pool::StalePolicy;
use super::queue::{CacheTask, QueueShared};
use crate::cache::Freshness;
use crate::delivery::{panic_message, Continuation};
use crate::error::FetchError;
use crate::network::NetworkResponse;
use crate::request::QueuedRequest;

pub(crate) fn run(shared: &Arc<QueueShared>, quit: &AtomicBool) {
    shared.initialize_cache();
    tracing::debug!("cache dispatcher started");

    while let Some(task) = shared.cache_queue.take(quit) {
        match task {
            CacheTask::Triage(request) => {
                if let Err(panic) = catch_unwind(AssertUnwindSafe(|| triage(shared, &request))) {
                    let message = panic_message(&*panic);
                    tracing::error!(
                        request = %request.meta(),
                        panic = %message,
                        "cache dispatcher panicked"
                    );
                    fail(shared, &request, FetchError::Internal(message));
                }
            }
            CacheTask::Clear(callback) => {
                shared.cache.clear();
                tracing::debug!("cache cleared");
                if let Some(callback) = callback {
                    if let Err(panic) = catch_unwind(AssertUnwindSafe(callback)) {
                        tracing::error!(
                            panic = %panic_message(&*panic),
                            "clear-cache callback panicked"
                        );
                    }
                }
            }
        }
    }
    tracing::debug!("cache dispatcher stopped");
}

fn triage(shared: &Arc<QueueShared>, request: &Arc<dyn QueuedRequest>) {
    let meta = request.meta();
    meta.add_marker("cache-queue-take");

    if meta.is_cancelled() {
        meta.finish("cache-discard-canceled");
        return;
    }

    let Some(entry) = shared.cache.get(meta.cache_key()) else {
        meta.add_marker("cache-miss");
        meta.notify(RequestEvent::CacheMiss);
        shared.forward_to_network(Arc::clone(request));
        return;
    };

    let now = SystemTime::now();
    let freshness = entry.freshness(now);
    if freshness == Freshness::HardStale && shared.config.stale_policy == StalePolicy::Strict {
        // Still useful for a conditional request.
        meta.add_marker("cache-hit-expired");
        meta.attach_cache_entry(Arc::clone(&entry));
        meta.notify(RequestEvent::CacheMiss);
        shared.forward_to_network(Arc::clone(request));
        return;
    }

    meta.add_marker("cache-hit");
    let cached = NetworkResponse::from_entry(&entry);
    let parsed = match Arc::clone(request).parse(&cached, &shared.parse_context(now)) {
        Ok(parsed) => parsed,
        Err(err) => {
            meta.add_marker("cache-parsing-failed");
            tracing::debug!(request = %meta, error = %err, "cached entry unparseable, refetching");
            shared.cache.invalidate(meta.cache_key(), true);
            meta.clear_cache_entry();
            shared.forward_to_network(Arc::clone(request));
            return;
        }
    };
    meta.add_marker("cache-hit-parsed");

    if freshness == Freshness::Fresh {
        meta.notify(RequestEvent::CacheHit { fresh: true });
        shared.delivery.post_response(Arc::clone(request), parsed);
        return;
    }

    // Soft-stale, or hard-stale under `AlwaysDeliver`: serve now, refresh after.
    meta.add_marker("cache-hit-refresh-needed");
    meta.attach_cache_entry(entry);
    meta.notify(RequestEvent::CacheHit { fresh: false });
    let parsed = parsed.into_intermediate();

    if shared.waiting.park_or_lead(request) {
        // A refresh is already in flight; its result reaches us as a waiter.
        meta.add_marker("waiting-for-response");
        meta.notify(RequestEvent::Deduplicated);
        shared.delivery.post_response(Arc::clone(request), parsed);
        return;
    }

    let refresh: Continuation = {
        let shared = Arc::clone(shared);
        let request = Arc::clone(request);
        Box::new(move || shared.push_network(request))
    };
    shared
        .delivery
        .post_response_then(Arc::clone(request), parsed, Some(refresh));
}

/// Deliver `error` and release anyone waiting on this request.
pub(super) fn fail(shared: &QueueShared, request: &Arc<dyn QueuedRequest>, error: FetchError) {
    shared.delivery.post_error(Arc::clone(request), error.clone());
    for waiter in shared.take_waiters(request) {
        if waiter.meta().is_cancelled() {
            waiter.meta().finish("dedup-discard-canceled");
        } else {
            shared.delivery.post_error(waiter, error.clone());
        }
    }
}
