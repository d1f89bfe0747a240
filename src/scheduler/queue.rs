//! The request queue: entry point for adding, cancelling and draining
//! requests, and owner of the dispatcher threads.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Once};
use std::time::{Duration, SystemTime};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use super::blocking::BlockingQueue;
use super::dedup::WaitingTable;
use super::events::{CounterSnapshot, QueueCounters, RequestEvent, RequestEventListener};
use super::pool::DispatcherConfig;
use super::priority::Priority;
use super::thread_pool::DispatcherPool;
use crate::cache::{Cache, MemoryCache};
use crate::config::CourierConfig;
use crate::delivery::{event_loop, Continuation, ExecutorDelivery, ResponseDelivery};
use crate::error::QueueError;
use crate::network::{BasicNetwork, Network, Transport};
use crate::request::{ParseContext, QueuedRequest, Request, RequestMeta};
use crate::retry::{DefaultRetryPolicy, RetryPolicy};
use crate::shutdown::{ShutdownCoordinator, ShutdownResult, ShutdownState};

/// Work for the cache dispatcher.
pub(crate) enum CacheTask {
    Triage(Arc<dyn QueuedRequest>),
    /// Clear the cache, then run the callback on the cache thread.
    Clear(Option<Continuation>),
}

/// State shared between the queue handle and its dispatcher threads.
pub(crate) struct QueueShared {
    pub(crate) cache: Arc<dyn Cache>,
    pub(crate) network: Arc<dyn Network>,
    pub(crate) delivery: Arc<dyn ResponseDelivery>,
    pub(crate) config: DispatcherConfig,
    pub(crate) cache_queue: BlockingQueue<CacheTask>,
    pub(crate) network_queue: BlockingQueue<Arc<dyn QueuedRequest>>,
    pub(crate) waiting: WaitingTable,
    pub(crate) lifecycle: ShutdownCoordinator,
    current: Mutex<HashMap<u64, Arc<dyn QueuedRequest>>>,
    listeners: RwLock<Vec<Arc<dyn RequestEventListener>>>,
    counters: QueueCounters,
    sequence: AtomicU64,
    cache_init: Once,
    workers: Mutex<Option<DispatcherPool>>,
}

impl QueueShared {
    fn new(
        cache: Arc<dyn Cache>,
        network: Arc<dyn Network>,
        delivery: Arc<dyn ResponseDelivery>,
        config: DispatcherConfig,
        listeners: Vec<Arc<dyn RequestEventListener>>,
    ) -> Self {
        Self {
            cache,
            network,
            delivery,
            config,
            cache_queue: BlockingQueue::new(),
            network_queue: BlockingQueue::new(),
            waiting: WaitingTable::new(),
            lifecycle: ShutdownCoordinator::new(),
            current: Mutex::new(HashMap::new()),
            listeners: RwLock::new(listeners),
            counters: QueueCounters::default(),
            sequence: AtomicU64::new(0),
            cache_init: Once::new(),
            workers: Mutex::new(None),
        }
    }

    pub(crate) fn notify(&self, request: &RequestMeta, event: &RequestEvent) {
        self.counters.record(event);
        tracing::trace!(request = %request, ?event, "request event");
        for listener in self.listeners.read().iter() {
            listener.on_request_event(request, event);
        }
    }

    pub(crate) fn finish(&self, request: &RequestMeta) {
        if let Some(sequence) = request.sequence() {
            self.current.lock().remove(&sequence);
        }
        self.notify(request, &RequestEvent::Finished);
    }

    pub(crate) fn parse_context(&self, now: SystemTime) -> ParseContext {
        ParseContext::new(now, self.config.cache_defaults)
    }

    /// Runs the cache's blocking setup once per queue.
    pub(crate) fn initialize_cache(&self) {
        self.cache_init.call_once(|| {
            if let Err(err) = self.cache.initialize() {
                tracing::error!(error = %err, "cache initialization failed");
            }
        });
    }

    pub(crate) fn push_network(&self, request: Arc<dyn QueuedRequest>) {
        let meta = request.meta();
        let (priority, sequence) = (meta.priority(), meta.sequence().unwrap_or_default());
        self.network_queue.push(request, priority, sequence);
    }

    /// Send a request to the network unless an identical one is in flight.
    pub(crate) fn forward_to_network(&self, request: Arc<dyn QueuedRequest>) {
        let meta = request.meta();
        if meta.should_cache() && self.waiting.park_or_lead(&request) {
            meta.add_marker("waiting-for-response");
            self.notify(meta, &RequestEvent::Deduplicated);
            return;
        }
        self.push_network(request);
    }

    /// A leader left without a result: the next live waiter fetches instead.
    pub(crate) fn hand_off(&self, request: &Arc<dyn QueuedRequest>) {
        let meta = request.meta();
        if !meta.should_cache() {
            return;
        }
        let promotion = self
            .waiting
            .promote_next(meta.cache_key(), meta.sequence().unwrap_or_default());
        for skipped in promotion.skipped {
            skipped.meta().finish("dedup-discard-canceled");
        }
        if let Some(next) = promotion.leader {
            next.meta().add_marker("promoted-to-network");
            self.push_network(next);
        }
    }

    /// Requests parked behind `request`, now that it has an outcome.
    pub(crate) fn take_waiters(
        &self,
        request: &Arc<dyn QueuedRequest>,
    ) -> Vec<Arc<dyn QueuedRequest>> {
        let meta = request.meta();
        if !meta.should_cache() {
            return Vec::new();
        }
        self.waiting
            .take_waiters(meta.cache_key(), meta.sequence().unwrap_or_default())
    }

    fn enqueue(self: &Arc<Self>, request: Arc<dyn QueuedRequest>) {
        let meta = request.meta();
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let retry = self.config.default_retry;
        meta.bind(
            sequence,
            Arc::downgrade(self),
            move || Box::new(DefaultRetryPolicy::from_config(&retry)) as Box<dyn RetryPolicy>,
            self.lifecycle.track(),
        );
        self.current.lock().insert(sequence, Arc::clone(&request));
        meta.add_marker("add-to-queue");
        self.notify(meta, &RequestEvent::Queued);

        let priority = meta.priority();
        if meta.should_cache() {
            self.cache_queue.push(CacheTask::Triage(request), priority, sequence);
        } else {
            self.network_queue.push(request, priority, sequence);
        }
    }
}

/// Point-in-time view of a queue.
#[derive(Debug, Clone, Serialize)]
pub struct QueueSnapshot {
    pub state: ShutdownState,
    pub cache_queue_depth: usize,
    pub network_queue_depth: usize,
    pub in_flight: usize,
    pub waiting_keys: usize,
    pub waiting_requests: usize,
    pub network_threads: usize,
    pub counters: CounterSnapshot,
}

impl QueueSnapshot {
    pub fn queue_depth(&self) -> usize {
        self.cache_queue_depth + self.network_queue_depth
    }
}

/// Builder for `RequestQueue`.
#[derive(Default)]
pub struct RequestQueueBuilder {
    cache: Option<Arc<dyn Cache>>,
    network: Option<Arc<dyn Network>>,
    delivery: Option<Arc<dyn ResponseDelivery>>,
    config: DispatcherConfig,
    listeners: Vec<Arc<dyn RequestEventListener>>,
}

impl RequestQueueBuilder {
    /// Defaults to a `MemoryCache` with the default budget.
    pub fn cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn network(mut self, network: Arc<dyn Network>) -> Self {
        self.network = Some(network);
        self
    }

    /// Defaults to delivering inline on dispatcher threads.
    pub fn delivery(mut self, delivery: Arc<dyn ResponseDelivery>) -> Self {
        self.delivery = Some(delivery);
        self
    }

    pub fn config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }

    pub fn listener(mut self, listener: Arc<dyn RequestEventListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn build(self) -> Result<RequestQueue, QueueError> {
        let network = self.network.ok_or(QueueError::MissingNetwork)?;
        let shared = QueueShared::new(
            self.cache
                .unwrap_or_else(|| Arc::new(MemoryCache::default()) as Arc<dyn Cache>),
            network,
            self.delivery.unwrap_or_else(|| {
                Arc::new(ExecutorDelivery::inline()) as Arc<dyn ResponseDelivery>
            }),
            self.config,
            self.listeners,
        );
        Ok(RequestQueue {
            shared: Arc::new(shared),
        })
    }
}

/// Client-side request scheduler.
///
/// Requests pass through one cache dispatcher thread and a pool of network
/// dispatcher threads. Results go to each request's listener through the
/// queue's `ResponseDelivery`. Dropping the queue stops its dispatchers.
pub struct RequestQueue {
    shared: Arc<QueueShared>,
}

impl RequestQueue {
    pub fn builder() -> RequestQueueBuilder {
        RequestQueueBuilder::default()
    }

    pub fn new(
        cache: Arc<dyn Cache>,
        network: Arc<dyn Network>,
        delivery: Arc<dyn ResponseDelivery>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            shared: Arc::new(QueueShared::new(cache, network, delivery, config, Vec::new())),
        }
    }

    /// Queue wired from configuration: the configured cache, a
    /// `BasicNetwork` over `transport`, and delivery on a dedicated thread.
    /// The delivery thread exits once the queue is dropped.
    pub fn from_config(
        config: &CourierConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, QueueError> {
        let dispatch = config.dispatcher_config();
        let (handle, event_loop) = event_loop();
        event_loop
            .spawn_thread(format!("{}-delivery", dispatch.thread_name_prefix))
            .map_err(|e| QueueError::ThreadSpawn(e.to_string()))?;

        let network = BasicNetwork::new(transport)
            .with_slow_request_threshold(dispatch.slow_request_threshold);
        Self::builder()
            .cache(config.cache.build())
            .network(Arc::new(network))
            .delivery(Arc::new(ExecutorDelivery::new(handle)))
            .config(dispatch)
            .build()
    }

    /// Start the dispatcher threads. No-op if already running.
    pub fn start(&self) -> Result<(), QueueError> {
        let mut workers = self.shared.workers.lock();
        if workers.is_some() {
            return Ok(());
        }
        *workers = Some(DispatcherPool::spawn(&self.shared)?);
        self.shared.lifecycle.set_state(ShutdownState::Running);
        tracing::info!(
            network_threads = self.shared.config.network_threads.get(),
            "request queue started"
        );
        Ok(())
    }

    /// Stop the dispatchers and join them. Queued requests stay queued
    /// and are picked up by the next `start`.
    pub fn stop(&self) {
        let pool = self.shared.workers.lock().take();
        if let Some(pool) = pool {
            pool.shutdown(&self.shared);
            tracing::info!("request queue stopped");
        }
        self.shared.lifecycle.set_state(ShutdownState::Stopped);
    }

    /// Wait for every added request to finish, then stop.
    pub fn stop_when_done(&self, timeout: Duration) -> ShutdownResult {
        let result = self.shared.lifecycle.drain(timeout);
        if let ShutdownResult::Timeout { remaining } = &result {
            tracing::warn!(remaining, "drain timed out, stopping with requests in flight");
        }
        self.stop();
        result
    }

    pub fn is_running(&self) -> bool {
        self.shared.workers.lock().is_some()
    }

    pub fn state(&self) -> ShutdownState {
        self.shared.lifecycle.state()
    }

    /// Add a request. The returned handle can cancel it.
    pub fn add<T: Send + 'static>(&self, request: Request<T>) -> Arc<Request<T>> {
        let request = Arc::new(request);
        self.shared.enqueue(Arc::clone(&request) as Arc<dyn QueuedRequest>);
        request
    }

    /// Add an already type-erased request.
    pub fn add_erased(&self, request: Arc<dyn QueuedRequest>) {
        self.shared.enqueue(request);
    }

    /// Cancel every in-flight request matching `filter`. Returns how many.
    pub fn cancel_all(&self, filter: impl Fn(&RequestMeta) -> bool) -> usize {
        let matching: Vec<_> = self
            .shared
            .current
            .lock()
            .values()
            .filter(|r| filter(r.meta()))
            .cloned()
            .collect();
        for request in &matching {
            request.meta().cancel();
        }
        matching.len()
    }

    pub fn cancel_all_tagged(&self, tag: &str) -> usize {
        self.cancel_all(|meta| meta.tag() == Some(tag))
    }

    /// Clear the cache on the cache dispatcher, ahead of any queued triage.
    ///
    /// A lookup the dispatcher has already started completes against the
    /// old contents. Requests still waiting in the cache queue, whenever
    /// they were added, see the cleared cache. Network fetches in flight are
    /// not cancelled and store their results afterwards. `callback` runs on
    /// the cache dispatcher once cleared.
    pub fn clear_cache(&self, callback: Option<Continuation>) {
        let sequence = self.shared.sequence.fetch_add(1, Ordering::SeqCst);
        self.shared
            .cache_queue
            .push(CacheTask::Clear(callback), Priority::Immediate, sequence);
    }

    pub fn cache(&self) -> &Arc<dyn Cache> {
        &self.shared.cache
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.shared.config
    }

    pub fn add_listener(&self, listener: Arc<dyn RequestEventListener>) {
        self.shared.listeners.write().push(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn RequestEventListener>) {
        self.shared
            .listeners
            .write()
            .retain(|l| !Arc::ptr_eq(l, listener));
    }

    /// Requests added but not yet finished.
    pub fn in_flight(&self) -> usize {
        self.shared.current.lock().len()
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            state: self.state(),
            cache_queue_depth: self.shared.cache_queue.len(),
            network_queue_depth: self.shared.network_queue.len(),
            in_flight: self.in_flight(),
            waiting_keys: self.shared.waiting.len(),
            waiting_requests: self.shared.waiting.waiter_count(),
            network_threads: self.shared.config.network_threads.get(),
            counters: self.shared.counters.snapshot(),
        }
    }
}

impl Drop for RequestQueue {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for RequestQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestQueue")
            .field("state", &self.state())
            .field("in_flight", &self.in_flight())
            .field("config", &self.shared.config)
            .finish()
    }
}
