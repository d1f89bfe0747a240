//! Dispatcher threads for one start/stop generation of a queue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use super::pool::WorkerRole;
use super::queue::QueueShared;
use super::{cache_worker, network_worker};
use crate::error::QueueError;

/// One cache dispatcher plus the network dispatcher pool.
///
/// Each generation owns its own quit flag, so a stopped generation can
/// never be revived by a later `start`.
pub(crate) struct DispatcherPool {
    quit: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl DispatcherPool {
    pub(crate) fn spawn(shared: &Arc<QueueShared>) -> Result<Self, QueueError> {
        let mut pool = Self {
            quit: Arc::new(AtomicBool::new(false)),
            handles: Vec::with_capacity(shared.config.network_threads.get() + 1),
        };
        let roles = std::iter::once(WorkerRole::Cache)
            .chain((0..shared.config.network_threads.get()).map(WorkerRole::Network));
        for role in roles {
            if let Err(err) = pool.spawn_worker(shared, role) {
                pool.shutdown(shared);
                return Err(err);
            }
        }
        Ok(pool)
    }

    fn spawn_worker(
        &mut self,
        shared: &Arc<QueueShared>,
        role: WorkerRole,
    ) -> Result<(), QueueError> {
        let config = &shared.config;
        let mut builder = thread::Builder::new().name(config.thread_name(role));
        if config.stack_size > 0 {
            builder = builder.stack_size(config.stack_size);
        }

        let shared = Arc::clone(shared);
        let quit = Arc::clone(&self.quit);
        let handle = builder
            .spawn(move || {
                if let Some(hook) = &shared.config.on_thread_start {
                    hook(role, shared.config.thread_priority);
                }
                match role {
                    WorkerRole::Cache => cache_worker::run(&shared, &quit),
                    WorkerRole::Network(index) => network_worker::run(&shared, &quit, index),
                }
            })
            .map_err(|e| QueueError::ThreadSpawn(e.to_string()))?;
        self.handles.push(handle);
        Ok(())
    }

    /// Signal every dispatcher to quit and join them.
    ///
    /// A dispatcher calling this from its own thread (e.g. a listener
    /// stopping the queue) is not joined; it exits when it returns.
    pub(crate) fn shutdown(self, shared: &QueueShared) {
        self.quit.store(true, Ordering::Release);
        shared.cache_queue.wake_all();
        shared.network_queue.wake_all();

        let current = thread::current().id();
        for handle in self.handles {
            if handle.thread().id() == current {
                continue;
            }
            let name = handle.thread().name().unwrap_or("dispatcher").to_string();
            if handle.join().is_err() {
                tracing::error!(thread = %name, "dispatcher thread panicked");
            }
        }
    }
}
