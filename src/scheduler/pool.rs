//! Dispatcher thread configuration.

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::CacheDefaults;
use crate::network::DEFAULT_SLOW_REQUEST_THRESHOLD;
use crate::retry::RetryConfig;

/// Default size of the network dispatcher pool.
pub const DEFAULT_NETWORK_THREADS: usize = 4;

/// Which dispatcher a thread runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerRole {
    Cache,
    Network(usize),
}

impl fmt::Display for WorkerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cache => f.write_str("cache"),
            Self::Network(index) => write!(f, "network-{index}"),
        }
    }
}

/// Scheduling hint passed to `on_thread_start`.
///
/// std threads cannot change their own priority portably, so the hook is
/// where a host applies it (e.g. via `libc::setpriority`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadPriority {
    #[default]
    Normal,
    Background,
}

/// Called at the start of every dispatcher thread.
pub type ThreadHook = Arc<dyn Fn(WorkerRole, ThreadPriority) + Send + Sync>;

/// What to do with a cached entry past its hard expiry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StalePolicy {
    /// Treat it as a miss, but revalidate with its ETag / date.
    #[default]
    Strict,
    /// Deliver it as an intermediate result, then refresh.
    AlwaysDeliver,
}

/// Dispatcher and scheduling configuration for a `RequestQueue`.
#[derive(Clone)]
pub struct DispatcherConfig {
    /// Number of network dispatcher threads.
    pub network_threads: NonZeroUsize,
    /// Thread stack size in bytes (0 = platform default).
    pub stack_size: usize,
    pub thread_name_prefix: String,
    pub thread_priority: ThreadPriority,
    pub on_thread_start: Option<ThreadHook>,
    pub stale_policy: StalePolicy,
    /// Freshness handed to parsers for responses without caching headers.
    pub cache_defaults: CacheDefaults,
    /// Retry settings for requests that do not bring their own policy.
    pub default_retry: RetryConfig,
    pub slow_request_threshold: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            network_threads: NonZeroUsize::new(DEFAULT_NETWORK_THREADS)
                .unwrap_or(NonZeroUsize::MIN),
            stack_size: 0,
            thread_name_prefix: "courier".to_string(),
            thread_priority: ThreadPriority::Background,
            on_thread_start: None,
            stale_policy: StalePolicy::Strict,
            cache_defaults: CacheDefaults::default(),
            default_retry: RetryConfig::default(),
            slow_request_threshold: DEFAULT_SLOW_REQUEST_THRESHOLD,
        }
    }
}

impl DispatcherConfig {
    /// Create config with a specific network pool size.
    pub fn with_threads(count: usize) -> Self {
        Self {
            network_threads: NonZeroUsize::new(count.max(1)).unwrap_or(NonZeroUsize::MIN),
            ..Default::default()
        }
    }

    /// One network thread per core.
    pub fn per_core() -> Self {
        Self::with_threads(num_cpus::get())
    }

    pub fn thread_name(&self, role: WorkerRole) -> String {
        format!("{}-{}", self.thread_name_prefix, role)
    }
}

impl fmt::Debug for DispatcherConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatcherConfig")
            .field("network_threads", &self.network_threads)
            .field("stack_size", &self.stack_size)
            .field("thread_name_prefix", &self.thread_name_prefix)
            .field("thread_priority", &self.thread_priority)
            .field("on_thread_start", &self.on_thread_start.is_some())
            .field("stale_policy", &self.stale_policy)
            .field("cache_defaults", &self.cache_defaults)
            .field("default_retry", &self.default_retry)
            .field("slow_request_threshold", &self.slow_request_threshold)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_threads_clamps_to_one() {
        assert_eq!(DispatcherConfig::with_threads(0).network_threads.get(), 1);
        assert_eq!(DispatcherConfig::with_threads(8).network_threads.get(), 8);
    }

    #[test]
    fn thread_names() {
        let config = DispatcherConfig::default();
        assert_eq!(config.thread_name(WorkerRole::Cache), "courier-cache");
        assert_eq!(config.thread_name(WorkerRole::Network(2)), "courier-network-2");
    }
}
