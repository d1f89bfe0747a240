//! Requests: what to fetch, how to parse it, and who hears about it.
//!
//! `Request<T>` pairs the type-independent `RequestMeta` with a parser and
//! a listener for `T`. The dispatchers only ever handle
//! `Arc<dyn QueuedRequest>`, so one queue serves requests of any result
//! type.

mod builder;
mod listener;
mod markers;
mod meta;
mod parser;

use std::fmt;
use std::sync::Arc;

use crate::cache::Entry;
use crate::error::FetchError;
use crate::network::NetworkResponse;

pub use builder::RequestBuilder;
pub use listener::{
    channel_listener, ChannelListener, Delivery, DeliveryReceiver, FnListener, Response,
    ResponseListener,
};
pub use meta::RequestMeta;
pub use parser::{
    BytesParser, JsonParser, ParseContext, Parsed, ResponseParser, StatusParser, StringParser,
};

/// A request for a value of type `T`.
pub struct Request<T> {
    meta: RequestMeta,
    parser: Box<dyn ResponseParser<T>>,
    listener: Box<dyn ResponseListener<T>>,
}

impl<T> Request<T> {
    pub(crate) fn from_parts(
        meta: RequestMeta,
        parser: Box<dyn ResponseParser<T>>,
        listener: Box<dyn ResponseListener<T>>,
    ) -> Self {
        Self {
            meta,
            parser,
            listener,
        }
    }

    pub fn meta(&self) -> &RequestMeta {
        &self.meta
    }

    /// Cancel the request. No callback fires after this returns.
    pub fn cancel(&self) {
        self.meta.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.meta.is_cancelled()
    }
}

impl<T: 'static> Request<T> {
    pub fn builder(
        method: crate::http::Method,
        url: impl Into<String>,
        parser: impl ResponseParser<T> + 'static,
    ) -> RequestBuilder<T> {
        RequestBuilder::new(method, url, parser)
    }

    pub fn get(
        url: impl Into<String>,
        parser: impl ResponseParser<T> + 'static,
    ) -> RequestBuilder<T> {
        Self::builder(crate::http::Method::Get, url, parser)
    }

    pub fn post(
        url: impl Into<String>,
        body: impl Into<Vec<u8>>,
        content_type: impl Into<String>,
        parser: impl ResponseParser<T> + 'static,
    ) -> RequestBuilder<T> {
        Self::builder(crate::http::Method::Post, url, parser).body(body, content_type)
    }
}

impl<T> fmt::Debug for Request<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request").field("meta", &self.meta).finish()
    }
}

/// Parse output with the typed value captured in a delivery closure.
pub struct ParsedResponse {
    cache_entry: Option<Entry>,
    intermediate: bool,
    deliver: Box<dyn FnOnce(bool) + Send>,
}

impl ParsedResponse {
    pub(crate) fn new(cache_entry: Option<Entry>, deliver: Box<dyn FnOnce(bool) + Send>) -> Self {
        Self {
            cache_entry,
            intermediate: false,
            deliver,
        }
    }

    pub fn is_intermediate(&self) -> bool {
        self.intermediate
    }

    pub fn cache_entry(&self) -> Option<&Entry> {
        self.cache_entry.as_ref()
    }

    pub(crate) fn take_cache_entry(&mut self) -> Option<Entry> {
        self.cache_entry.take()
    }

    pub(crate) fn into_intermediate(mut self) -> Self {
        self.intermediate = true;
        self
    }

    /// Hand the value to the request's listener.
    pub fn deliver(self) {
        (self.deliver)(self.intermediate)
    }
}

impl fmt::Debug for ParsedResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParsedResponse")
            .field("cached", &self.cache_entry.is_some())
            .field("intermediate", &self.intermediate)
            .finish()
    }
}

/// Type-erased request as stored in the dispatch queues.
pub trait QueuedRequest: Send + Sync {
    fn meta(&self) -> &RequestMeta;

    /// Run this request's parser over `response`.
    fn parse(
        self: Arc<Self>,
        response: &NetworkResponse,
        ctx: &ParseContext,
    ) -> Result<ParsedResponse, FetchError>;

    fn deliver_error(&self, error: FetchError);
}

impl<T: Send + 'static> QueuedRequest for Request<T> {
    fn meta(&self) -> &RequestMeta {
        &self.meta
    }

    fn parse(
        self: Arc<Self>,
        response: &NetworkResponse,
        ctx: &ParseContext,
    ) -> Result<ParsedResponse, FetchError> {
        let Parsed { value, cache_entry } = self.parser.parse(response, ctx)?;
        Ok(ParsedResponse::new(
            cache_entry,
            Box::new(move |intermediate| {
                self.listener.on_response(Response {
                    value,
                    intermediate,
                })
            }),
        ))
    }

    fn deliver_error(&self, error: FetchError) {
        self.listener.on_error(error);
    }
}
