//! Response parsing.
//!
//! A parser turns a `NetworkResponse` into the caller's value and, when the
//! response may be cached, the `Entry` to store. Parsers run on dispatcher
//! threads, never on the delivery context.

use std::marker::PhantomData;
use std::time::SystemTime;

use serde::de::DeserializeOwned;

use crate::cache::{parse_cache_headers, CacheDefaults, Entry};
use crate::error::FetchError;
use crate::network::NetworkResponse;

/// Inputs a parser may need besides the response itself.
#[derive(Debug, Clone, Copy)]
pub struct ParseContext {
    pub now: SystemTime,
    pub cache_defaults: CacheDefaults,
}

impl ParseContext {
    pub fn new(now: SystemTime, cache_defaults: CacheDefaults) -> Self {
        Self {
            now,
            cache_defaults,
        }
    }

    /// Cache entry for `response` following its caching headers.
    pub fn cache_entry(&self, response: &NetworkResponse) -> Option<Entry> {
        parse_cache_headers(response, self.now, &self.cache_defaults)
    }
}

impl Default for ParseContext {
    fn default() -> Self {
        Self::new(SystemTime::now(), CacheDefaults::default())
    }
}

/// Parsed value plus the entry to cache, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct Parsed<T> {
    pub value: T,
    pub cache_entry: Option<Entry>,
}

impl<T> Parsed<T> {
    pub fn new(value: T, cache_entry: Option<Entry>) -> Self {
        Self { value, cache_entry }
    }

    pub fn uncached(value: T) -> Self {
        Self {
            value,
            cache_entry: None,
        }
    }
}

pub trait ResponseParser<T>: Send + Sync {
    fn parse(
        &self,
        response: &NetworkResponse,
        ctx: &ParseContext,
    ) -> Result<Parsed<T>, FetchError>;
}

impl<T, F> ResponseParser<T> for F
where
    F: Fn(&NetworkResponse, &ParseContext) -> Result<Parsed<T>, FetchError> + Send + Sync,
{
    fn parse(
        &self,
        response: &NetworkResponse,
        ctx: &ParseContext,
    ) -> Result<Parsed<T>, FetchError> {
        self(response, ctx)
    }
}

/// Raw body bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesParser;

impl ResponseParser<Vec<u8>> for BytesParser {
    fn parse(
        &self,
        response: &NetworkResponse,
        ctx: &ParseContext,
    ) -> Result<Parsed<Vec<u8>>, FetchError> {
        Ok(Parsed::new(response.data.clone(), ctx.cache_entry(response)))
    }
}

/// Text body. Decodes per the `Content-Type` charset (utf-8, us-ascii,
/// iso-8859-1); anything else is read as utf-8. Invalid bytes are replaced.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringParser;

impl ResponseParser<String> for StringParser {
    fn parse(
        &self,
        response: &NetworkResponse,
        ctx: &ParseContext,
    ) -> Result<Parsed<String>, FetchError> {
        let charset = response.headers.get("Content-Type").and_then(charset_of);
        let text = match charset.as_deref() {
            Some("iso-8859-1" | "latin1") => response.data.iter().map(|&b| char::from(b)).collect(),
            _ => String::from_utf8_lossy(&response.data).into_owned(),
        };
        Ok(Parsed::new(text, ctx.cache_entry(response)))
    }
}

fn charset_of(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        name.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches('"').to_ascii_lowercase())
    })
}

/// JSON body deserialized into `T`.
pub struct JsonParser<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonParser<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonParser<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for JsonParser<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("JsonParser")
    }
}

impl<T: DeserializeOwned> ResponseParser<T> for JsonParser<T> {
    fn parse(
        &self,
        response: &NetworkResponse,
        ctx: &ParseContext,
    ) -> Result<Parsed<T>, FetchError> {
        let value = serde_json::from_slice(&response.data)
            .map_err(|e| FetchError::Parse(format!("invalid json: {e}")))?;
        Ok(Parsed::new(value, ctx.cache_entry(response)))
    }
}

/// Status code only. Never cached.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusParser;

impl ResponseParser<u16> for StatusParser {
    fn parse(
        &self,
        response: &NetworkResponse,
        _ctx: &ParseContext,
    ) -> Result<Parsed<u16>, FetchError> {
        Ok(Parsed::uncached(response.status))
    }
}
