//! Telemetry: structured logging, request spans and metrics.

mod logging;
mod metrics;
mod spans;

pub use logging::{init_logging, LogConfig, LogError, LogFormat};
pub use metrics::MetricsListener;
pub use spans::{RequestSpan, SpanExt};
