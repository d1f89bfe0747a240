//! Request scheduling for courier.
//!
//! Manages the request queue, prioritization, the cache and network
//! dispatchers, deduplication of identical requests, and thread pool
//! configuration.

mod blocking;
mod cache_worker;
mod dedup;
mod events;
mod network_worker;
mod pool;
mod priority;
mod queue;
mod thread_pool;

pub use events::{CounterSnapshot, RequestEvent, RequestEventListener};
pub use pool::{
    DispatcherConfig, StalePolicy, ThreadHook, ThreadPriority, WorkerRole, DEFAULT_NETWORK_THREADS,
};
pub use priority::{Priority, PriorityQueue};
pub use queue::{QueueSnapshot, RequestQueue, RequestQueueBuilder};

pub(crate) use queue::QueueShared;
