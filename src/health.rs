//! Health check support for a request queue.
//!
//! Provides liveness, readiness, and full health reports computed from a
//! `QueueSnapshot`, for hosts that expose them to an orchestrator.

use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::scheduler::QueueSnapshot;
use crate::shutdown::ShutdownState;

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Detailed health report.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub state: HealthState,
    pub ready: bool,
    pub accepting_requests: bool,
    pub queue_depth: usize,
    pub in_flight: usize,
    pub waiting_requests: usize,
    pub failed_total: u64,
    pub uptime_secs: u64,
}

/// Health check configuration.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Queued (not yet dispatched) requests at which the queue reports degraded.
    pub max_queue_depth: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            max_queue_depth: 1000,
        }
    }
}

/// Aggregates health information from queue snapshots.
pub struct HealthChecker {
    config: HealthConfig,
    start_time: Instant,
}

impl HealthChecker {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            start_time: Instant::now(),
        }
    }

    /// Check liveness: process is responsive.
    pub fn is_alive(&self) -> bool {
        true
    }

    /// Check readiness: dispatchers running and backlog under the limit.
    pub fn is_ready(&self, snapshot: &QueueSnapshot) -> bool {
        snapshot.state == ShutdownState::Running
            && snapshot.queue_depth() < self.config.max_queue_depth
    }

    /// Generate full health report.
    pub fn report(&self, snapshot: &QueueSnapshot) -> HealthReport {
        HealthReport {
            state: self.compute_state(snapshot),
            ready: self.is_ready(snapshot),
            accepting_requests: snapshot.state == ShutdownState::Running,
            queue_depth: snapshot.queue_depth(),
            in_flight: snapshot.in_flight,
            waiting_requests: snapshot.waiting_requests,
            failed_total: snapshot.counters.failed,
            uptime_secs: self.start_time.elapsed().as_secs(),
        }
    }

    fn compute_state(&self, snapshot: &QueueSnapshot) -> HealthState {
        if snapshot.state != ShutdownState::Running {
            return HealthState::Unhealthy;
        }
        if snapshot.queue_depth() >= self.config.max_queue_depth {
            return HealthState::Degraded;
        }
        HealthState::Healthy
    }
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new(HealthConfig::default())
    }
}
