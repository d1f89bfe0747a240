//! Derive cache entries from standard HTTP caching headers.

use std::time::{Duration, SystemTime};

use super::{expiry_after, Entry, MAX_LIFETIME_SECS};
use crate::http::parse_http_date;
use crate::network::NetworkResponse;

/// Freshness applied when a response carries no TTL-bearing headers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheDefaults {
    pub soft_ttl: Duration,
    pub ttl: Duration,
}

impl CacheDefaults {
    pub fn new(soft_ttl: Duration, ttl: Duration) -> Self {
        Self {
            soft_ttl: soft_ttl.min(ttl),
            ttl,
        }
    }
}

#[derive(Debug, Default)]
struct CacheControl {
    max_age: Option<u64>,
    stale_while_revalidate: u64,
    must_revalidate: bool,
    no_store: bool,
}

fn parse_cache_control<'a>(values: impl Iterator<Item = &'a str>) -> CacheControl {
    let mut cc = CacheControl::default();
    for directive in values.flat_map(|v| v.split(',')) {
        let directive = directive.trim().to_ascii_lowercase();
        let (name, arg) = match directive.split_once('=') {
            Some((n, a)) => (n.trim().to_string(), Some(a.trim().trim_matches('"').to_string())),
            None => (directive.clone(), None),
        };
        match (name.as_str(), arg) {
            ("no-cache" | "no-store", _) => cc.no_store = true,
            ("max-age", Some(a)) => cc.max_age = parse_delta_seconds(&a),
            ("stale-while-revalidate", Some(a)) => {
                cc.stale_while_revalidate = parse_delta_seconds(&a).unwrap_or(0);
            }
            ("must-revalidate" | "proxy-revalidate", _) => cc.must_revalidate = true,
            _ => {}
        }
    }
    cc
}

/// Delta-seconds too large for `u64` still count as the longest lifetime.
fn parse_delta_seconds(arg: &str) -> Option<u64> {
    if arg.is_empty() || !arg.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let secs = arg.parse::<u64>().unwrap_or(MAX_LIFETIME_SECS);
    Some(secs.min(MAX_LIFETIME_SECS))
}

/// Build a cache entry from `response`, or `None` if the server forbids caching.
///
/// Precedence: `Cache-Control: max-age` (with `stale-while-revalidate`
/// extending the hard expiry unless `must-revalidate`), then
/// `Expires - Date`, then `defaults`.
pub fn parse_cache_headers(
    response: &NetworkResponse,
    now: SystemTime,
    defaults: &CacheDefaults,
) -> Option<Entry> {
    let headers = &response.headers;
    let server_date = headers.get("Date").and_then(parse_http_date);
    let cc = parse_cache_control(headers.get_all("Cache-Control"));
    if cc.no_store {
        return None;
    }

    let expires = headers.get("Expires").and_then(parse_http_date);
    let (soft, hard) = if let Some(max_age) = cc.max_age {
        let soft = expiry_after(now, Duration::from_secs(max_age));
        let hard = if cc.must_revalidate {
            soft
        } else {
            expiry_after(soft, Duration::from_secs(cc.stale_while_revalidate))
        };
        (soft, hard)
    } else if let (Some(date), Some(expires)) = (server_date, expires) {
        let lifetime = expires.duration_since(date).unwrap_or(Duration::ZERO);
        let expiry = expiry_after(now, lifetime);
        (expiry, expiry)
    } else {
        (expiry_after(now, defaults.soft_ttl), expiry_after(now, defaults.ttl))
    };

    let mut entry = Entry::new(response.data.clone(), soft, hard);
    entry.etag = headers.get("ETag").map(str::to_string);
    entry.server_date = server_date;
    entry.last_modified = headers.get("Last-Modified").and_then(parse_http_date);
    entry.response_headers = headers.clone();
    Some(entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{format_http_date, Headers};
    use std::time::UNIX_EPOCH;

    fn response(headers: &[(&str, &str)]) -> NetworkResponse {
        NetworkResponse::new(200, headers.iter().copied().collect::<Headers>(), b"body".to_vec())
    }

    fn now() -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(1_700_000_000)
    }

    #[test]
    fn max_age_sets_soft_and_hard() {
        let entry = parse_cache_headers(
            &response(&[("Cache-Control", "public, max-age=60")]),
            now(),
            &CacheDefaults::default(),
        )
        .unwrap();
        assert_eq!(entry.soft_ttl(), now() + Duration::from_secs(60));
        assert_eq!(entry.ttl(), now() + Duration::from_secs(60));
        assert_eq!(entry.data, b"body");
    }

    #[test]
    fn stale_while_revalidate_extends_hard_expiry() {
        let entry = parse_cache_headers(
            &response(&[("Cache-Control", "max-age=10, stale-while-revalidate=50")]),
            now(),
            &CacheDefaults::default(),
        )
        .unwrap();
        assert_eq!(entry.soft_ttl(), now() + Duration::from_secs(10));
        assert_eq!(entry.ttl(), now() + Duration::from_secs(60));
    }

    #[test]
    fn must_revalidate_pins_hard_to_soft() {
        let entry = parse_cache_headers(
            &response(&[(
                "Cache-Control",
                "max-age=10, stale-while-revalidate=50, must-revalidate",
            )]),
            now(),
            &CacheDefaults::default(),
        )
        .unwrap();
        assert_eq!(entry.ttl(), entry.soft_ttl());
    }

    #[test]
    fn no_store_is_not_cacheable() {
        for value in ["no-store", "no-cache", "private, NO-CACHE"] {
            let parsed = parse_cache_headers(
                &response(&[("Cache-Control", value)]),
                now(),
                &CacheDefaults::default(),
            );
            assert!(parsed.is_none(), "{value} should not be cacheable");
        }
    }

    #[test]
    fn expires_minus_date_without_cache_control() {
        let date = UNIX_EPOCH + Duration::from_secs(1_000_000);
        let expires = date + Duration::from_secs(300);
        let entry = parse_cache_headers(
            &response(&[
                ("Date", format_http_date(date).as_str()),
                ("Expires", format_http_date(expires).as_str()),
            ]),
            now(),
            &CacheDefaults::default(),
        )
        .unwrap();
        assert_eq!(entry.soft_ttl(), now() + Duration::from_secs(300));
        assert_eq!(entry.server_date, Some(date));
    }

    #[test]
    fn defaults_apply_without_headers() {
        let defaults = CacheDefaults::new(Duration::from_secs(5), Duration::from_secs(30));
        let entry =
            parse_cache_headers(&response(&[("ETag", "\"v1\"")]), now(), &defaults).unwrap();
        assert_eq!(entry.soft_ttl(), now() + Duration::from_secs(5));
        assert_eq!(entry.ttl(), now() + Duration::from_secs(30));
        assert_eq!(entry.etag.as_deref(), Some("\"v1\""));
    }

    #[test]
    fn huge_max_age_is_capped() {
        let entry = parse_cache_headers(
            &response(&[("Cache-Control", "max-age=18446744073709551615")]),
            now(),
            &CacheDefaults::default(),
        )
        .unwrap();
        let cap = now() + Duration::from_secs(MAX_LIFETIME_SECS);
        assert_eq!(entry.soft_ttl(), cap);
        assert_eq!(entry.ttl(), cap);
    }

    #[test]
    fn max_age_beyond_u64_is_capped() {
        let entry = parse_cache_headers(
            &response(&[(
                "Cache-Control",
                "max-age=99999999999999999999999, stale-while-revalidate=99999999999999999999",
            )]),
            now(),
            &CacheDefaults::default(),
        )
        .unwrap();
        let cap = Duration::from_secs(MAX_LIFETIME_SECS);
        assert_eq!(entry.soft_ttl(), now() + cap);
        assert_eq!(entry.ttl(), now() + cap + cap);
    }

    #[test]
    fn malformed_max_age_falls_back_to_defaults() {
        let defaults = CacheDefaults::new(Duration::from_secs(5), Duration::from_secs(30));
        let entry = parse_cache_headers(
            &response(&[("Cache-Control", "max-age=-1")]),
            now(),
            &defaults,
        )
        .unwrap();
        assert_eq!(entry.soft_ttl(), now() + Duration::from_secs(5));
    }

    #[test]
    fn huge_default_ttls_are_capped() {
        let defaults = CacheDefaults::new(Duration::MAX, Duration::MAX);
        let entry = parse_cache_headers(&response(&[]), now(), &defaults).unwrap();
        assert_eq!(entry.ttl(), now() + Duration::from_secs(MAX_LIFETIME_SECS));
    }
}
