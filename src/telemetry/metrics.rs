//! Request metrics through the `metrics` facade.
//!
//! Nothing is exported unless the host installs a recorder.

use metrics::{counter, histogram};

use crate::request::RequestMeta;
use crate::scheduler::{RequestEvent, RequestEventListener};

/// Records request lifecycle events as counters and histograms.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsListener;

impl RequestEventListener for MetricsListener {
    fn on_request_event(&self, request: &RequestMeta, event: &RequestEvent) {
        match *event {
            RequestEvent::Queued => counter!("courier_requests_added_total").increment(1),
            RequestEvent::CacheHit { fresh } => {
                let freshness = if fresh { "fresh" } else { "stale" };
                counter!("courier_cache_hits_total", "freshness" => freshness).increment(1);
            }
            RequestEvent::CacheMiss => counter!("courier_cache_misses_total").increment(1),
            RequestEvent::Deduplicated => {
                counter!("courier_requests_deduplicated_total").increment(1);
            }
            RequestEvent::NetworkStarted { .. } => {
                counter!("courier_network_attempts_total").increment(1);
            }
            RequestEvent::NetworkFinished { status, elapsed } => {
                let class = status_class(status);
                histogram!("courier_network_duration_seconds", "status" => class)
                    .record(elapsed.as_secs_f64());
            }
            RequestEvent::Retried { .. } => counter!("courier_retries_total").increment(1),
            RequestEvent::Delivered { intermediate } => {
                let kind = if intermediate { "intermediate" } else { "final" };
                counter!("courier_responses_delivered_total", "kind" => kind).increment(1);
            }
            RequestEvent::Failed { kind } => {
                counter!("courier_requests_failed_total", "error" => kind).increment(1);
            }
            RequestEvent::Cancelled => counter!("courier_requests_cancelled_total").increment(1),
            RequestEvent::Finished => {
                histogram!("courier_request_duration_seconds")
                    .record(request.elapsed().as_secs_f64());
            }
        }
    }
}

fn status_class(status: Option<u16>) -> &'static str {
    match status {
        Some(200..=299) => "2xx",
        Some(300..=399) => "3xx",
        Some(400..=499) => "4xx",
        Some(500..=599) => "5xx",
        Some(_) => "other",
        None => "none",
    }
}
