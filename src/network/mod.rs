//! Network seam.
//!
//! `Transport` is the raw HTTP client a host application plugs in.
//! `Network` turns a queued request into a classified `NetworkResponse`,
//! adding conditional headers and folding `304 Not Modified` into the
//! cached entry. `BasicNetwork` is the stock implementation.

mod basic;

use std::fmt;
use std::time::Duration;

use crate::cache::Entry;
use crate::error::{FetchError, TransportError};
use crate::http::{Headers, Method};
use crate::request::RequestMeta;

pub use basic::{BasicNetwork, DEFAULT_SLOW_REQUEST_THRESHOLD};

/// Raw HTTP response data after network execution.
#[derive(Clone, PartialEq, Eq)]
pub struct NetworkResponse {
    pub status: u16,
    pub headers: Headers,
    pub data: Vec<u8>,
    /// Body came from the cache after the server answered 304.
    pub not_modified: bool,
    pub network_time: Duration,
}

impl NetworkResponse {
    pub fn new(status: u16, headers: Headers, data: Vec<u8>) -> Self {
        Self {
            status,
            headers,
            data,
            not_modified: false,
            network_time: Duration::ZERO,
        }
    }

    /// Synthesized response used to parse a cache hit.
    pub fn from_entry(entry: &Entry) -> Self {
        Self::new(200, entry.response_headers.clone(), entry.data.clone())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

impl fmt::Debug for NetworkResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkResponse")
            .field("status", &self.status)
            .field("headers", &self.headers.len())
            .field("data_len", &self.data.len())
            .field("not_modified", &self.not_modified)
            .field("network_time", &self.network_time)
            .finish()
    }
}

/// One HTTP exchange as seen by the transport.
#[derive(Debug, Clone)]
pub struct TransportRequest<'a> {
    pub method: Method,
    pub url: &'a str,
    pub headers: &'a Headers,
    pub body: Option<&'a [u8]>,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

/// What the transport got back, before status classification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }
}

/// Blocking HTTP client. Called from network dispatcher threads.
pub trait Transport: Send + Sync {
    fn execute(&self, request: &TransportRequest<'_>) -> Result<RawResponse, TransportError>;
}

/// Performs a request and classifies the outcome.
pub trait Network: Send + Sync {
    fn perform_request(&self, request: &RequestMeta) -> Result<NetworkResponse, FetchError>;
}

/// Supplies credentials and reacts to 401/403.
///
/// When a network has an authenticator, auth failures become retryable:
/// `invalidate` runs first so the next attempt picks up fresh credentials.
pub trait Authenticator: Send + Sync {
    fn auth_headers(&self, request: &RequestMeta) -> Result<Headers, FetchError>;

    fn invalidate(&self, status: u16);
}
