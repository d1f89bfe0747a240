use url::Url;

use super::listener::{FnListener, Response, ResponseListener};
use super::meta::{MetaParts, RequestMeta};
use super::parser::ResponseParser;
use super::Request;
use crate::error::{FetchError, RequestBuildError};
use crate::http::{Headers, Method};
use crate::retry::RetryPolicy;
use crate::scheduler::Priority;

/// Builder for `Request<T>`.
pub struct RequestBuilder<T> {
    method: Method,
    url: String,
    headers: Headers,
    body: Option<(Vec<u8>, String)>,
    priority: Priority,
    tag: Option<String>,
    cache_key: Option<String>,
    should_cache: Option<bool>,
    retry_server_errors: bool,
    retry_policy: Option<Box<dyn RetryPolicy>>,
    parser: Box<dyn ResponseParser<T>>,
    listener: Option<Box<dyn ResponseListener<T>>>,
    callbacks: FnListener<T>,
}

impl<T: 'static> RequestBuilder<T> {
    pub fn new(
        method: Method,
        url: impl Into<String>,
        parser: impl ResponseParser<T> + 'static,
    ) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Headers::new(),
            body: None,
            priority: Priority::Normal,
            tag: None,
            cache_key: None,
            should_cache: None,
            retry_server_errors: false,
            retry_policy: None,
            parser: Box::new(parser),
            listener: None,
            callbacks: FnListener::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>, content_type: impl Into<String>) -> Self {
        self.body = Some((body.into(), content_type.into()));
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Label used by `RequestQueue::cancel_all_tagged`.
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Override the default `"{METHOD} {url}"` cache key.
    pub fn cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = Some(key.into());
        self
    }

    pub fn should_cache(mut self, should_cache: bool) -> Self {
        self.should_cache = Some(should_cache);
        self
    }

    /// Treat 5xx responses as recoverable.
    pub fn retry_server_errors(mut self, retry: bool) -> Self {
        self.retry_server_errors = retry;
        self
    }

    /// Defaults to the queue's configured policy.
    pub fn retry_policy(mut self, policy: impl RetryPolicy + 'static) -> Self {
        self.retry_policy = Some(Box::new(policy));
        self
    }

    /// Replaces any closures registered with `on_response`/`on_error`.
    pub fn listener(mut self, listener: impl ResponseListener<T> + 'static) -> Self {
        self.listener = Some(Box::new(listener));
        self
    }

    pub fn on_response(mut self, f: impl Fn(Response<T>) + Send + Sync + 'static) -> Self {
        self.callbacks = self.callbacks.on_response(f);
        self
    }

    pub fn on_error(mut self, f: impl Fn(FetchError) + Send + Sync + 'static) -> Self {
        self.callbacks = self.callbacks.on_error(f);
        self
    }

    pub fn build(self) -> Result<Request<T>, RequestBuildError> {
        let url = Url::parse(&self.url).map_err(|e| RequestBuildError::InvalidUrl {
            url: self.url.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(RequestBuildError::InvalidUrl {
                url: self.url,
                reason: format!("unsupported scheme {:?}", url.scheme()),
            });
        }

        let cache_key = self
            .cache_key
            .unwrap_or_else(|| format!("{} {}", self.method, self.url));
        let (body, body_content_type) = match self.body {
            Some((body, content_type)) => (Some(body), Some(content_type)),
            None => (None, None),
        };
        let meta = RequestMeta::new(MetaParts {
            method: self.method,
            url: self.url,
            headers: self.headers,
            body,
            body_content_type,
            cache_key,
            priority: self.priority,
            should_cache: self
                .should_cache
                .unwrap_or_else(|| self.method.is_cacheable_by_default()),
            retry_server_errors: self.retry_server_errors,
            tag: self.tag,
            retry_policy: self.retry_policy,
        });
        let listener = self
            .listener
            .unwrap_or_else(|| Box::new(self.callbacks) as Box<dyn ResponseListener<T>>);
        Ok(Request::from_parts(meta, self.parser, listener))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{BytesParser, StatusParser};

    #[test]
    fn defaults() {
        let request = Request::get("https://example.com/a?b=1", BytesParser).build().unwrap();
        let meta = request.meta();
        assert_eq!(meta.cache_key(), "GET https://example.com/a?b=1");
        assert_eq!(meta.priority(), Priority::Normal);
        assert!(meta.should_cache());
        assert!(!meta.retry_server_errors());
        assert_eq!(meta.sequence(), None);
    }

    #[test]
    fn post_is_not_cached_by_default() {
        let request = Request::builder(Method::Post, "http://example.com/", StatusParser)
            .body(b"{}".to_vec(), "application/json")
            .build()
            .unwrap();
        assert!(!request.meta().should_cache());
        assert_eq!(request.meta().body(), Some(&b"{}"[..]));
        assert_eq!(request.meta().body_content_type(), Some("application/json"));
    }

    #[test]
    fn overrides() {
        let request = Request::get("http://example.com/", BytesParser)
            .cache_key("custom")
            .should_cache(false)
            .priority(Priority::High)
            .tag("screen-1")
            .header("Accept", "text/plain")
            .build()
            .unwrap();
        let meta = request.meta();
        assert_eq!(meta.cache_key(), "custom");
        assert!(!meta.should_cache());
        assert_eq!(meta.priority(), Priority::High);
        assert_eq!(meta.tag(), Some("screen-1"));
        assert_eq!(meta.headers().get("accept"), Some("text/plain"));
    }

    #[test]
    fn rejects_bad_urls() {
        for url in ["not a url", "ftp://example.com/file", ""] {
            let err = Request::get(url, BytesParser).build().unwrap_err();
            assert!(matches!(err, RequestBuildError::InvalidUrl { .. }), "{url}");
        }
    }
}
