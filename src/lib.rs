//! Courier
//!
//! A client-side HTTP request scheduler. Requests are prioritized, answered
//! from a response cache when possible, deduplicated while an identical
//! request is in flight, executed on a pool of network threads with
//! per-request retry, and delivered to listeners on a chosen context.
//!
//! # Pipeline
//!
//! - **Cache dispatcher**: one thread triaging requests against the cache.
//!   Fresh hits are delivered directly; soft-stale hits are delivered as an
//!   intermediate result and then refreshed.
//! - **Network dispatchers**: a fixed pool executing requests through a
//!   `Network`, writing cacheable results back, and retrying recoverable
//!   failures per the request's `RetryPolicy`.
//! - **Delivery**: results and errors are posted through a
//!   `ResponseDelivery`, inline or onto an event loop.
//!
//! No HTTP client ships with the crate: plug one in through
//! `network::Transport`.

pub mod cache;
pub mod config;
pub mod delivery;
pub mod error;
pub mod health;
pub mod http;
pub mod network;
pub mod request;
pub mod retry;
pub mod scheduler;
pub mod shutdown;
pub mod telemetry;

pub use cache::{Cache, DiskCache, Entry, Freshness, MemoryCache, NoCache};
pub use config::CourierConfig;
pub use delivery::{ExecutorDelivery, ResponseDelivery};
pub use error::{FetchError, QueueError, RequestBuildError};
pub use network::{BasicNetwork, Network, NetworkResponse, Transport};
pub use request::{Request, RequestBuilder, RequestMeta, Response, ResponseListener};
pub use retry::{DefaultRetryPolicy, RetryPolicy};
pub use scheduler::{DispatcherConfig, Priority, RequestQueue, StalePolicy};
pub use shutdown::{ShutdownResult, ShutdownState};
