//! Per-request retry policy.
//!
//! A policy owns the timeouts handed to the transport and the retry budget.
//! Each recoverable failure calls `retry`, which either grows the timeouts
//! by the backoff multiplier or reports that the budget is spent.

use std::time::Duration;

use serde::Deserialize;

use crate::error::{FetchError, NoMoreRetries};

/// Timeout and retry bookkeeping for one request.
pub trait RetryPolicy: Send + std::fmt::Debug {
    /// Timeout for establishing the connection on the next attempt.
    fn current_connect_timeout(&self) -> Duration;

    /// Timeout for reading the response on the next attempt.
    fn current_read_timeout(&self) -> Duration;

    /// Number of retries already consumed.
    fn current_retry_count(&self) -> u32;

    /// Prepare for another attempt after `error`.
    fn retry(&mut self, error: &FetchError) -> Result<(), NoMoreRetries>;
}

/// Retry settings, shared by `DefaultRetryPolicy` and the config file.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub initial_timeout_ms: u64,
    pub max_retries: u32,
    pub backoff_multiplier: f32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_timeout_ms: DefaultRetryPolicy::DEFAULT_TIMEOUT_MS,
            max_retries: DefaultRetryPolicy::DEFAULT_MAX_RETRIES,
            backoff_multiplier: DefaultRetryPolicy::DEFAULT_BACKOFF_MULTIPLIER,
        }
    }
}

/// Timeout grows as `timeout += timeout * multiplier` after each retry,
/// saturating at `MAX_TIMEOUT`.
#[derive(Debug, Clone)]
pub struct DefaultRetryPolicy {
    current_timeout: Duration,
    current_retry_count: u32,
    max_num_retries: u32,
    backoff_multiplier: f32,
}

impl DefaultRetryPolicy {
    pub const DEFAULT_TIMEOUT_MS: u64 = 2500;
    /// Callers opt in to retries explicitly.
    pub const DEFAULT_MAX_RETRIES: u32 = 0;
    pub const DEFAULT_BACKOFF_MULTIPLIER: f32 = 1.0;
    /// Ceiling for the per-attempt timeout.
    pub const MAX_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

    pub fn new(initial_timeout: Duration, max_num_retries: u32, backoff_multiplier: f32) -> Self {
        Self {
            current_timeout: initial_timeout.min(Self::MAX_TIMEOUT),
            current_retry_count: 0,
            max_num_retries,
            backoff_multiplier: backoff_multiplier.max(0.0),
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            Duration::from_millis(config.initial_timeout_ms.max(1)),
            config.max_retries,
            config.backoff_multiplier,
        )
    }

    pub fn max_num_retries(&self) -> u32 {
        self.max_num_retries
    }

    pub fn backoff_multiplier(&self) -> f32 {
        self.backoff_multiplier
    }

    fn next_timeout(&self) -> Duration {
        let extra = self.current_timeout.as_secs_f64() * f64::from(self.backoff_multiplier);
        Duration::try_from_secs_f64(extra)
            .ok()
            .and_then(|extra| self.current_timeout.checked_add(extra))
            .map_or(Self::MAX_TIMEOUT, |timeout| timeout.min(Self::MAX_TIMEOUT))
    }

    fn has_attempt_remaining(&self) -> bool {
        self.current_retry_count < self.max_num_retries
    }
}

impl Default for DefaultRetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy for DefaultRetryPolicy {
    fn current_connect_timeout(&self) -> Duration {
        self.current_timeout
    }

    fn current_read_timeout(&self) -> Duration {
        self.current_timeout
    }

    fn current_retry_count(&self) -> u32 {
        self.current_retry_count
    }

    fn retry(&mut self, _error: &FetchError) -> Result<(), NoMoreRetries> {
        if !self.has_attempt_remaining() {
            return Err(NoMoreRetries {
                attempts: self.current_retry_count + 1,
            });
        }
        self.current_retry_count += 1;
        self.current_timeout = self.next_timeout();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_never_retries() {
        let mut policy = DefaultRetryPolicy::default();
        assert_eq!(policy.current_connect_timeout(), Duration::from_millis(2500));
        let err = policy.retry(&FetchError::Timeout).unwrap_err();
        assert_eq!(err.attempts, 1);
        assert_eq!(policy.current_retry_count(), 0);
    }

    #[test]
    fn backoff_grows_timeout() {
        let mut policy = DefaultRetryPolicy::new(Duration::from_millis(100), 2, 1.0);
        policy.retry(&FetchError::Timeout).unwrap();
        assert_eq!(policy.current_read_timeout(), Duration::from_millis(200));
        policy.retry(&FetchError::Timeout).unwrap();
        assert_eq!(policy.current_read_timeout(), Duration::from_millis(400));
        assert_eq!(policy.current_retry_count(), 2);
        assert_eq!(policy.retry(&FetchError::Timeout), Err(NoMoreRetries { attempts: 3 }));
    }

    #[test]
    fn zero_multiplier_keeps_timeout_fixed() {
        let mut policy = DefaultRetryPolicy::new(Duration::from_millis(50), 3, 0.0);
        policy.retry(&FetchError::Timeout).unwrap();
        assert_eq!(policy.current_connect_timeout(), Duration::from_millis(50));
    }

    #[test]
    fn steep_backoff_saturates_at_ceiling() {
        let mut policy = DefaultRetryPolicy::new(Duration::from_millis(2500), 10, 1000.0);
        for _ in 0..10 {
            policy.retry(&FetchError::Timeout).unwrap();
            assert!(policy.current_read_timeout() <= DefaultRetryPolicy::MAX_TIMEOUT);
        }
        assert_eq!(policy.current_read_timeout(), DefaultRetryPolicy::MAX_TIMEOUT);
        assert_eq!(policy.current_retry_count(), 10);
        assert_eq!(policy.retry(&FetchError::Timeout), Err(NoMoreRetries { attempts: 11 }));
    }

    #[test]
    fn huge_initial_timeout_is_capped() {
        let policy = DefaultRetryPolicy::new(Duration::MAX, 0, 1.0);
        assert_eq!(policy.current_connect_timeout(), DefaultRetryPolicy::MAX_TIMEOUT);
    }
}
