//! Error types for the request scheduler.
//!
//! `FetchError` is what listeners see. Everything else is raised at the
//! seams (transport, cache, configuration, queue construction).

use std::sync::Arc;

use thiserror::Error;

use crate::network::NetworkResponse;

/// Request-scoped failure delivered through `ResponseListener::on_error`.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,

    #[error("no connection: {0}")]
    NoConnection(String),

    #[error("server error: HTTP {status}")]
    Server {
        status: u16,
        response: Option<Arc<NetworkResponse>>,
        retryable: bool,
    },

    #[error("client error: HTTP {status}")]
    Client {
        status: u16,
        response: Option<Arc<NetworkResponse>>,
    },

    #[error("authentication failed: HTTP {status}")]
    Auth {
        status: u16,
        response: Option<Arc<NetworkResponse>>,
        retryable: bool,
    },

    #[error("failed to parse response: {0}")]
    Parse(String),

    #[error("dispatcher failure: {0}")]
    Internal(String),
}

impl FetchError {
    /// Whether the network dispatcher may retry this failure.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Timeout | Self::NoConnection(_) => true,
            Self::Server { retryable, .. } | Self::Auth { retryable, .. } => *retryable,
            Self::Client { .. } | Self::Parse(_) | Self::Internal(_) => false,
        }
    }

    /// HTTP status carried by the error, if the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Server { status, .. }
            | Self::Client { status, .. }
            | Self::Auth { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Raw response carried by the error, if any.
    pub fn response(&self) -> Option<&NetworkResponse> {
        match self {
            Self::Server { response, .. }
            | Self::Client { response, .. }
            | Self::Auth { response, .. } => response.as_deref(),
            _ => None,
        }
    }

    /// Short label used for markers and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::NoConnection(_) => "connection",
            Self::Server { .. } => "server",
            Self::Client { .. } => "client",
            Self::Auth { .. } => "auth",
            Self::Parse(_) => "parse",
            Self::Internal(_) => "internal",
        }
    }
}

/// Failure raised by a `Transport` implementation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl From<TransportError> for FetchError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout => Self::Timeout,
            TransportError::Connection(msg) => Self::NoConnection(msg),
            TransportError::Malformed(msg) => Self::Parse(msg),
        }
    }
}

/// Returned by `RetryPolicy::retry` once the attempt budget is spent.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("no more retries after {attempts} attempts")]
pub struct NoMoreRetries {
    pub attempts: u32,
}

/// Storage failures inside a cache implementation.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt cache entry for {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("cache serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Invalid request construction.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RequestBuildError {
    #[error("invalid url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// Queue construction and lifecycle failures.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("request queue requires a network")]
    MissingNetwork,

    #[error("failed to spawn dispatcher thread: {0}")]
    ThreadSpawn(String),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Configuration file failures. Environment overrides never error; bad
/// values there fall back to defaults.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
