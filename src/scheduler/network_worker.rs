//! Network dispatcher: execute requests, cache and deliver the results.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use super::cache_worker::fail;
use super::events::RequestEvent;
use super::queue::QueueShared;
use crate::delivery::panic_message;
use crate::error::FetchError;
use crate::network::NetworkResponse;
use crate::request::{ParseContext, QueuedRequest};
use crate::telemetry::{RequestSpan, SpanExt};

pub(crate) fn run(shared: &Arc<QueueShared>, quit: &AtomicBool, index: usize) {
    tracing::debug!(worker = index, "network dispatcher started");
    while let Some(request) = shared.network_queue.take(quit) {
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| process(shared, &request))) {
            let message = panic_message(&*panic);
            tracing::error!(
                request = %request.meta(),
                panic = %message,
                "network dispatcher panicked"
            );
            fail(shared, &request, FetchError::Internal(message));
        }
    }
    tracing::debug!(worker = index, "network dispatcher stopped");
}

fn process(shared: &QueueShared, request: &Arc<dyn QueuedRequest>) {
    let meta = request.meta();
    meta.add_marker("network-queue-take");

    if meta.is_cancelled() {
        meta.finish("network-discard-cancelled");
        shared.hand_off(request);
        return;
    }

    let span = RequestSpan::new(meta.sequence().unwrap_or_default(), meta.cache_key());
    let _entered = span.enter();

    let attempt = meta.retry_count() + 1;
    meta.notify(RequestEvent::NetworkStarted { attempt });
    let started = Instant::now();
    let result = shared.network.perform_request(meta);
    let elapsed = started.elapsed();
    span.record_result(&result);
    span.record("elapsed_ms", elapsed.as_millis() as u64);
    meta.add_marker("network-http-complete");
    meta.notify(RequestEvent::NetworkFinished {
        status: match &result {
            Ok(response) => Some(response.status),
            Err(err) => err.status(),
        },
        elapsed,
    });

    match result {
        Ok(response) => on_success(shared, request, Arc::new(response)),
        Err(err) if err.is_recoverable() => on_recoverable(shared, request, err),
        Err(err) => {
            meta.add_marker(format!("{}-error", err.kind()));
            fail(shared, request, err);
        }
    }
}

fn on_success(
    shared: &QueueShared,
    request: &Arc<dyn QueuedRequest>,
    response: Arc<NetworkResponse>,
) {
    let meta = request.meta();
    if response.not_modified {
        meta.add_marker("not-modified");
    }

    let ctx = shared.parse_context(SystemTime::now());
    let mut parsed = match Arc::clone(request).parse(&response, &ctx) {
        Ok(parsed) => parsed,
        Err(err) => {
            meta.add_marker("network-parse-failed");
            fail(shared, request, err);
            return;
        }
    };
    meta.add_marker("network-parse-complete");

    if meta.should_cache() {
        if let Some(entry) = parsed.take_cache_entry() {
            shared.cache.put(meta.cache_key(), entry);
            meta.add_marker("network-cache-written");
        }
    }

    // Cancelled mid-flight: the cache write above still stands, and so do
    // the waiters below. Only this request's own delivery is dropped.
    if meta.is_cancelled() {
        meta.finish("network-discard-cancelled");
    } else {
        shared.delivery.post_response(Arc::clone(request), parsed);
    }

    for waiter in shared.take_waiters(request) {
        deliver_to_waiter(shared, &waiter, &response, &ctx);
    }
}

fn deliver_to_waiter(
    shared: &QueueShared,
    waiter: &Arc<dyn QueuedRequest>,
    response: &NetworkResponse,
    ctx: &ParseContext,
) {
    let meta = waiter.meta();
    if meta.is_cancelled() {
        meta.finish("dedup-discard-canceled");
        return;
    }
    meta.add_marker("dedup-response");
    match Arc::clone(waiter).parse(response, ctx) {
        Ok(parsed) => shared.delivery.post_response(Arc::clone(waiter), parsed),
        Err(err) => shared.delivery.post_error(Arc::clone(waiter), err),
    }
}

fn on_recoverable(shared: &QueueShared, request: &Arc<dyn QueuedRequest>, error: FetchError) {
    let meta = request.meta();
    match meta.retry(&error) {
        Ok(()) => {
            let attempt = meta.retry_count();
            let (timeout, _) = meta.current_timeouts();
            meta.add_marker(format!("{}-retry [timeout={}ms]", error.kind(), timeout.as_millis()));
            meta.notify(RequestEvent::Retried { attempt });
            tracing::debug!(request = %meta, attempt, error = %error, "retrying request");
            shared.push_network(Arc::clone(request));
        }
        Err(exhausted) => {
            meta.add_marker(format!("{}-giveup", error.kind()));
            tracing::debug!(
                request = %meta,
                attempts = exhausted.attempts,
                error = %error,
                "retries exhausted"
            );
            fail(shared, request, error);
        }
    }
}

#[cfg(test)]
#[path = "network_worker_tests.rs"]
mod tests;
