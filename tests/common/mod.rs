//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use courier::error::TransportError;
use courier::http::{Headers, Method};
use courier::network::{BasicNetwork, RawResponse, Transport, TransportRequest};
use courier::request::{channel_listener, Delivery, DeliveryReceiver, Request, StringParser};
use courier::scheduler::{DispatcherConfig, RequestQueue};
use courier::cache::{Cache, MemoryCache};

pub type Outcome = Result<RawResponse, TransportError>;

/// What the transport saw for one call.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: Method,
    pub url: String,
    pub headers: Headers,
    pub read_timeout: Duration,
}

/// Transport that replays queued outcomes, then repeats a fallback.
pub struct MockTransport {
    script: Mutex<VecDeque<Outcome>>,
    fallback: Mutex<Outcome>,
    delay: Mutex<Duration>,
    calls: AtomicUsize,
    seen: Mutex<Vec<Recorded>>,
}

impl MockTransport {
    pub fn new(fallback: Outcome) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(fallback),
            delay: Mutex::new(Duration::ZERO),
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        })
    }

    /// Always answers 200 with `body`.
    pub fn ok(body: &str) -> Arc<Self> {
        Self::new(Ok(RawResponse::new(200).with_body(body)))
    }

    pub fn push(&self, outcome: Outcome) {
        self.script.lock().push_back(outcome);
    }

    pub fn set_fallback(&self, outcome: Outcome) {
        *self.fallback.lock() = outcome;
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<Recorded> {
        self.seen.lock().clone()
    }
}

impl Transport for MockTransport {
    fn execute(&self, request: &TransportRequest<'_>) -> Result<RawResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push(Recorded {
            method: request.method,
            url: request.url.to_string(),
            headers: request.headers.clone(),
            read_timeout: request.read_timeout,
        });
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        let next = self.script.lock().pop_front();
        next.unwrap_or_else(|| self.fallback.lock().clone())
    }
}

pub fn dispatcher_config(threads: usize) -> DispatcherConfig {
    DispatcherConfig::with_threads(threads)
}

/// Queue over `transport` with a memory cache. Not started.
pub fn queue(transport: Arc<MockTransport>, config: DispatcherConfig) -> RequestQueue {
    queue_with_cache(transport, config, Arc::new(MemoryCache::default()))
}

pub fn queue_with_cache(
    transport: Arc<MockTransport>,
    config: DispatcherConfig,
    cache: Arc<dyn Cache>,
) -> RequestQueue {
    RequestQueue::builder()
        .network(Arc::new(BasicNetwork::new(transport)))
        .cache(cache)
        .config(config)
        .build()
        .expect("network configured")
}

pub fn get(url: &str) -> (Request<String>, DeliveryReceiver<String>) {
    let (listener, rx) = channel_listener();
    let request = Request::get(url, StringParser).listener(listener).build().expect("valid url");
    (request, rx)
}

pub async fn next(rx: &mut DeliveryReceiver<String>) -> Delivery<String> {
    tokio::time::timeout(Duration::from_secs(3), rx.recv())
        .await
        .expect("delivery timed out")
        .expect("listener dropped")
}

/// Body of the next delivery, and whether it was intermediate.
pub async fn next_body(rx: &mut DeliveryReceiver<String>) -> (String, bool) {
    match next(rx).await {
        Delivery::Response(r) => (r.value, r.intermediate),
        Delivery::Error(e) => panic!("expected response, got error: {e}"),
    }
}

pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(3), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached");
}
