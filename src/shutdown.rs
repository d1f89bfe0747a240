//! Queue lifecycle and drain coordination.
//!
//! Every request added to a queue holds an `InFlightGuard` until it
//! finishes. `stop_when_done` waits on the guard count reaching zero before
//! stopping the dispatchers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, RwLock};
use serde::Serialize;

/// Lifecycle state of a request queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownState {
    Running,
    Draining,
    Stopped,
}

/// Result of a drain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownResult {
    Complete,
    Timeout { remaining: u32 },
}

struct InFlight {
    count: Mutex<u32>,
    drained: Condvar,
}

/// Tracks queue state and in-flight requests.
pub struct ShutdownCoordinator {
    state: RwLock<ShutdownState>,
    in_flight: Arc<InFlight>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(ShutdownState::Stopped),
            in_flight: Arc::new(InFlight {
                count: Mutex::new(0),
                drained: Condvar::new(),
            }),
        }
    }

    pub fn state(&self) -> ShutdownState {
        *self.state.read()
    }

    pub(crate) fn set_state(&self, state: ShutdownState) {
        *self.state.write() = state;
    }

    /// Dispatchers are running and no drain is in progress.
    pub fn is_accepting(&self) -> bool {
        self.state() == ShutdownState::Running
    }

    /// Track an in-flight request until the guard drops.
    pub fn track(&self) -> InFlightGuard {
        *self.in_flight.count.lock() += 1;
        InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    pub fn in_flight_count(&self) -> u32 {
        *self.in_flight.count.lock()
    }

    /// Enter `Draining` and block until nothing is in flight or `timeout`
    /// passes. The caller decides what state follows.
    pub fn drain(&self, timeout: Duration) -> ShutdownResult {
        self.set_state(ShutdownState::Draining);
        self.wait_for_drain(timeout)
    }

    fn wait_for_drain(&self, timeout: Duration) -> ShutdownResult {
        let deadline = Instant::now() + timeout;
        let mut count = self.in_flight.count.lock();
        while *count > 0 {
            if self.in_flight.drained.wait_until(&mut count, deadline).timed_out() {
                return match *count {
                    0 => ShutdownResult::Complete,
                    remaining => ShutdownResult::Timeout { remaining },
                };
            }
        }
        ShutdownResult::Complete
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard for in-flight request tracking.
pub struct InFlightGuard {
    in_flight: Arc<InFlight>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut count = self.in_flight.count.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.in_flight.drained.notify_all();
        }
    }
}

impl std::fmt::Debug for InFlightGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("InFlightGuard")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn starts_stopped() {
        let coordinator = ShutdownCoordinator::new();
        assert_eq!(coordinator.state(), ShutdownState::Stopped);
        assert!(!coordinator.is_accepting());
    }

    #[test]
    fn drain_with_nothing_in_flight_completes() {
        let coordinator = ShutdownCoordinator::new();
        coordinator.set_state(ShutdownState::Running);
        assert_eq!(coordinator.drain(Duration::from_millis(10)), ShutdownResult::Complete);
        assert_eq!(coordinator.state(), ShutdownState::Draining);
    }

    #[test]
    fn drain_times_out_with_remaining() {
        let coordinator = ShutdownCoordinator::new();
        let _a = coordinator.track();
        let _b = coordinator.track();
        assert_eq!(
            coordinator.drain(Duration::from_millis(20)),
            ShutdownResult::Timeout { remaining: 2 }
        );
    }

    #[test]
    fn drain_wakes_when_guards_drop() {
        let coordinator = Arc::new(ShutdownCoordinator::new());
        let guard = coordinator.track();
        let dropper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            drop(guard);
        });
        assert_eq!(coordinator.drain(Duration::from_secs(5)), ShutdownResult::Complete);
        assert_eq!(coordinator.in_flight_count(), 0);
        dropper.join().unwrap();
    }
}
