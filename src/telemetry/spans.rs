//! Span utilities for request tracing.

use tracing::{info_span, Span};

/// Extension trait for adding context to spans.
pub trait SpanExt {
    /// Record the result of an operation into the span.
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display;
}

impl SpanExt for Span {
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display,
    {
        match result {
            Ok(_) => {
                self.record("outcome", "ok");
            }
            Err(e) => {
                self.record("outcome", "error");
                self.record("error.message", e.to_string().as_str());
            }
        }
    }
}

/// Factory for network attempt spans.
pub struct RequestSpan;

impl RequestSpan {
    /// Span covering one network attempt.
    ///
    /// `outcome` and `error.message` are filled by `SpanExt::record_result`,
    /// `elapsed_ms` by the dispatcher once the attempt returns.
    pub fn new(sequence: u64, cache_key: &str) -> Span {
        info_span!(
            "http_request",
            sequence,
            cache_key = %cache_key,
            outcome = tracing::field::Empty,
            error.message = tracing::field::Empty,
            elapsed_ms = tracing::field::Empty,
        )
    }
}
