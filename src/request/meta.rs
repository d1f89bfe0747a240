//! Type-independent request state shared by the dispatchers.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use parking_lot::Mutex;

use super::markers::MarkerLog;
use crate::cache::Entry;
use crate::error::{FetchError, NoMoreRetries};
use crate::http::{Headers, Method};
use crate::network::DEFAULT_SLOW_REQUEST_THRESHOLD;
use crate::retry::{DefaultRetryPolicy, RetryPolicy};
use crate::scheduler::{Priority, QueueShared, RequestEvent};
use crate::shutdown::InFlightGuard;

/// Everything about a request except its result type.
///
/// Dispatchers, networks and cache logic see requests through this type.
pub struct RequestMeta {
    method: Method,
    url: String,
    headers: Headers,
    body: Option<Vec<u8>>,
    body_content_type: Option<String>,
    cache_key: String,
    priority: Priority,
    should_cache: bool,
    retry_server_errors: bool,
    tag: Option<String>,

    sequence: OnceLock<u64>,
    cancelled: AtomicBool,
    final_delivered: AtomicBool,
    finished: AtomicBool,
    retry_policy: Mutex<Option<Box<dyn RetryPolicy>>>,
    cache_entry: Mutex<Option<Arc<Entry>>>,
    markers: Mutex<MarkerLog>,
    queue: OnceLock<Weak<QueueShared>>,
    in_flight: Mutex<Option<InFlightGuard>>,
}

pub(crate) struct MetaParts {
    pub method: Method,
    pub url: String,
    pub headers: Headers,
    pub body: Option<Vec<u8>>,
    pub body_content_type: Option<String>,
    pub cache_key: String,
    pub priority: Priority,
    pub should_cache: bool,
    pub retry_server_errors: bool,
    pub tag: Option<String>,
    pub retry_policy: Option<Box<dyn RetryPolicy>>,
}

impl RequestMeta {
    pub(crate) fn new(parts: MetaParts) -> Self {
        Self {
            method: parts.method,
            url: parts.url,
            headers: parts.headers,
            body: parts.body,
            body_content_type: parts.body_content_type,
            cache_key: parts.cache_key,
            priority: parts.priority,
            should_cache: parts.should_cache,
            retry_server_errors: parts.retry_server_errors,
            tag: parts.tag,
            sequence: OnceLock::new(),
            cancelled: AtomicBool::new(false),
            final_delivered: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            retry_policy: Mutex::new(parts.retry_policy),
            cache_entry: Mutex::new(None),
            markers: Mutex::new(MarkerLog::new()),
            queue: OnceLock::new(),
            in_flight: Mutex::new(None),
        }
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    pub fn body_content_type(&self) -> Option<&str> {
        self.body_content_type.as_deref()
    }

    pub fn cache_key(&self) -> &str {
        &self.cache_key
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn should_cache(&self) -> bool {
        self.should_cache
    }

    pub fn retry_server_errors(&self) -> bool {
        self.retry_server_errors
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    /// Position assigned when the request was added to a queue.
    pub fn sequence(&self) -> Option<u64> {
        self.sequence.get().copied()
    }

    /// Stop any further delivery. Safe to call from any thread.
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::AcqRel) {
            self.add_marker("cancel");
            self.notify(RequestEvent::Cancelled);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Whether a final response or error has reached the listener.
    pub fn has_had_response_delivered(&self) -> bool {
        self.final_delivered.load(Ordering::Acquire)
    }

    /// Entry attached for revalidation, if any.
    pub fn cache_entry(&self) -> Option<Arc<Entry>> {
        self.cache_entry.lock().clone()
    }

    pub fn attach_cache_entry(&self, entry: Arc<Entry>) {
        *self.cache_entry.lock() = Some(entry);
    }

    pub(crate) fn clear_cache_entry(&self) {
        self.cache_entry.lock().take();
    }

    /// Connect and read timeouts for the next attempt.
    pub fn current_timeouts(&self) -> (Duration, Duration) {
        let mut policy = self.retry_policy.lock();
        let policy = policy.get_or_insert_with(default_policy);
        (policy.current_connect_timeout(), policy.current_read_timeout())
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_policy
            .lock()
            .as_ref()
            .map_or(0, |p| p.current_retry_count())
    }

    pub(crate) fn retry(&self, error: &FetchError) -> Result<(), NoMoreRetries> {
        let mut policy = self.retry_policy.lock();
        policy.get_or_insert_with(default_policy).retry(error)
    }

    pub fn add_marker(&self, name: impl Into<String>) {
        self.markers.lock().add(name);
    }

    /// Marker names recorded so far.
    pub fn markers(&self) -> Vec<String> {
        self.markers.lock().names()
    }

    pub fn elapsed(&self) -> Duration {
        self.markers.lock().elapsed()
    }

    /// Attach to a queue. Called exactly once, by `RequestQueue::add`.
    pub(crate) fn bind(
        &self,
        sequence: u64,
        queue: Weak<QueueShared>,
        default_retry: impl FnOnce() -> Box<dyn RetryPolicy>,
        guard: InFlightGuard,
    ) {
        let first = self.sequence.set(sequence).is_ok();
        debug_assert!(first, "request added to a queue twice");
        let _ = self.queue.set(queue);
        self.retry_policy.lock().get_or_insert_with(default_retry);
        *self.in_flight.lock() = Some(guard);
    }

    #[cfg(test)]
    pub(crate) fn assign_sequence_for_test(&self, sequence: u64) {
        let _ = self.sequence.set(sequence);
    }

    /// Claim the single final delivery. Returns false if it already happened.
    pub(crate) fn claim_final_delivery(&self) -> bool {
        !self.final_delivered.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn notify(&self, event: RequestEvent) {
        if let Some(queue) = self.queue() {
            queue.notify(self, &event);
        }
    }

    /// End the request's life in the queue. Idempotent.
    pub(crate) fn finish(&self, reason: &str) {
        if self.finished.swap(true, Ordering::AcqRel) {
            return;
        }
        let queue = self.queue();
        let threshold = queue
            .as_ref()
            .map_or(DEFAULT_SLOW_REQUEST_THRESHOLD, |q| q.config.slow_request_threshold);
        {
            let mut markers = self.markers.lock();
            markers.add(reason);
            markers.dump(&self.to_string(), threshold);
        }
        if let Some(queue) = queue {
            queue.finish(self);
        }
        self.in_flight.lock().take();
    }

    fn queue(&self) -> Option<Arc<QueueShared>> {
        self.queue.get().and_then(Weak::upgrade)
    }
}

fn default_policy() -> Box<dyn RetryPolicy> {
    Box::new(DefaultRetryPolicy::default())
}

impl fmt::Display for RequestMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cancelled = if self.is_cancelled() { "[X] " } else { "[ ] " };
        write!(
            f,
            "{cancelled}{} {:?} #{}",
            self.cache_key,
            self.priority,
            self.sequence().unwrap_or(0)
        )
    }
}

impl fmt::Debug for RequestMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestMeta")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("cache_key", &self.cache_key)
            .field("priority", &self.priority)
            .field("sequence", &self.sequence())
            .field("should_cache", &self.should_cache)
            .field("cancelled", &self.is_cancelled())
            .field("finished", &self.is_finished())
            .finish()
    }
}
