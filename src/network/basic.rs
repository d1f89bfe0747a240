use std::sync::Arc;
use std::time::{Duration, Instant, UNIX_EPOCH};

use super::{Authenticator, Network, NetworkResponse, RawResponse, Transport, TransportRequest};
use crate::cache::Entry;
use crate::error::FetchError;
use crate::http::{format_http_date, Headers};
use crate::request::RequestMeta;

/// Requests slower than this are logged at warn.
pub const DEFAULT_SLOW_REQUEST_THRESHOLD: Duration = Duration::from_millis(3000);

/// `Network` over a pluggable `Transport`.
pub struct BasicNetwork {
    transport: Arc<dyn Transport>,
    authenticator: Option<Arc<dyn Authenticator>>,
    slow_request_threshold: Duration,
}

impl BasicNetwork {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            authenticator: None,
            slow_request_threshold: DEFAULT_SLOW_REQUEST_THRESHOLD,
        }
    }

    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    pub fn with_slow_request_threshold(mut self, threshold: Duration) -> Self {
        self.slow_request_threshold = threshold;
        self
    }

    fn request_headers(&self, request: &RequestMeta) -> Result<Headers, FetchError> {
        let mut headers = request.headers().clone();
        if let Some(entry) = request.cache_entry() {
            add_conditional_headers(&mut headers, &entry);
        }
        if let Some(content_type) = request.body_content_type() {
            if !headers.contains("Content-Type") {
                headers.set("Content-Type", content_type);
            }
        }
        if let Some(auth) = &self.authenticator {
            for header in auth.auth_headers(request)?.iter() {
                headers.set(header.name.clone(), header.value.clone());
            }
        }
        Ok(headers)
    }

    fn log_slow_request(&self, request: &RequestMeta, elapsed: Duration, status: u16) {
        if elapsed > self.slow_request_threshold {
            tracing::warn!(
                url = request.url(),
                status,
                elapsed_ms = elapsed.as_millis() as u64,
                retry_count = request.retry_count(),
                "slow http request"
            );
        }
    }

    fn classify(
        &self,
        request: &RequestMeta,
        raw: RawResponse,
        elapsed: Duration,
    ) -> Result<NetworkResponse, FetchError> {
        let status = raw.status;
        let response = NetworkResponse {
            status,
            headers: raw.headers,
            data: raw.body,
            not_modified: false,
            network_time: elapsed,
        };

        match status {
            304 => merge_not_modified(request.cache_entry().as_deref(), response),
            200..=299 => Ok(response),
            401 | 403 => {
                let retryable = match &self.authenticator {
                    Some(auth) => {
                        auth.invalidate(status);
                        true
                    }
                    None => false,
                };
                Err(FetchError::Auth {
                    status,
                    response: Some(Arc::new(response)),
                    retryable,
                })
            }
            500..=599 => Err(FetchError::Server {
                status,
                response: Some(Arc::new(response)),
                retryable: request.retry_server_errors(),
            }),
            // Everything else, including redirects the transport did not follow.
            _ => Err(FetchError::Client {
                status,
                response: Some(Arc::new(response)),
            }),
        }
    }
}

impl Network for BasicNetwork {
    fn perform_request(&self, request: &RequestMeta) -> Result<NetworkResponse, FetchError> {
        let started = Instant::now();
        let headers = self.request_headers(request)?;
        let (connect_timeout, read_timeout) = request.current_timeouts();
        let transport_request = TransportRequest {
            method: request.method(),
            url: request.url(),
            headers: &headers,
            body: request.body(),
            connect_timeout,
            read_timeout,
        };

        let raw = self.transport.execute(&transport_request).map_err(|err| {
            tracing::debug!(url = request.url(), error = %err, "transport failed");
            FetchError::from(err)
        })?;
        let elapsed = started.elapsed();
        self.log_slow_request(request, elapsed, raw.status);
        self.classify(request, raw, elapsed)
    }
}

fn add_conditional_headers(headers: &mut Headers, entry: &Entry) {
    if let Some(etag) = &entry.etag {
        headers.set("If-None-Match", etag.clone());
    }
    let last_modified = entry.last_modified.or(entry.server_date);
    if let Some(time) = last_modified.filter(|t| *t > UNIX_EPOCH) {
        headers.set("If-Modified-Since", format_http_date(time));
    }
}

/// Fold a 304 into the cached entry. Response headers win over cached ones.
///
/// A 304 with no entry to revalidate has no body worth caching, so it is a
/// client error.
fn merge_not_modified(
    entry: Option<&Entry>,
    response: NetworkResponse,
) -> Result<NetworkResponse, FetchError> {
    let Some(entry) = entry else {
        return Err(FetchError::Client {
            status: 304,
            response: Some(Arc::new(response)),
        });
    };
    Ok(NetworkResponse {
        status: 304,
        headers: entry.response_headers.merged_with(&response.headers),
        data: entry.data.clone(),
        not_modified: true,
        network_time: response.network_time,
    })
}
