//! Per-request lifecycle markers.
//!
//! Markers are cheap timestamps recorded as a request moves between
//! dispatchers. They are dumped once, when the request finishes: at debug
//! level normally, at warn when the request was slow.

use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub(crate) struct Marker {
    name: String,
    thread: String,
    at: Duration,
}

#[derive(Debug)]
pub(crate) struct MarkerLog {
    started: Instant,
    markers: Vec<Marker>,
    dumped: bool,
}

impl MarkerLog {
    pub(crate) fn new() -> Self {
        Self {
            started: Instant::now(),
            markers: Vec::new(),
            dumped: false,
        }
    }

    pub(crate) fn add(&mut self, name: impl Into<String>) {
        if self.dumped {
            return;
        }
        let thread = std::thread::current().name().unwrap_or("unnamed").to_string();
        self.markers.push(Marker {
            name: name.into(),
            thread,
            at: self.started.elapsed(),
        });
    }

    pub(crate) fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Emit the collected markers. Later calls are no-ops.
    pub(crate) fn dump(&mut self, request: &str, slow_threshold: Duration) {
        if self.dumped {
            return;
        }
        self.dumped = true;
        let total = self.started.elapsed();
        let trail = self.render();
        if total >= slow_threshold {
            tracing::warn!(
                request,
                total_ms = total.as_millis() as u64,
                markers = %trail,
                "slow request"
            );
        } else {
            tracing::debug!(
                request,
                total_ms = total.as_millis() as u64,
                markers = %trail,
                "request finished"
            );
        }
    }

    pub(crate) fn names(&self) -> Vec<String> {
        self.markers.iter().map(|m| m.name.clone()).collect()
    }

    fn render(&self) -> String {
        let mut prev = Duration::ZERO;
        let mut out = String::new();
        for marker in &self.markers {
            let delta = marker.at.saturating_sub(prev);
            prev = marker.at;
            if !out.is_empty() {
                out.push_str(" | ");
            }
            out.push_str(&format!("+{}ms {} [{}]", delta.as_millis(), marker.name, marker.thread));
        }
        out
    }
}
