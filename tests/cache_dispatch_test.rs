//! Tests for cache triage: freshness, revalidation and cache clearing.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use common::{get, next, next_body, queue, wait_until, MockTransport};
use courier::cache::{Cache, Entry, Freshness};
use courier::network::RawResponse;
use courier::request::{channel_listener, JsonParser, Request};
use courier::scheduler::{DispatcherConfig, StalePolicy};

const URL: &str = "http://a.test/resource";
const KEY: &str = "GET http://a.test/resource";

fn entry(body: &str, soft: Duration, hard: Duration) -> Entry {
    Entry::expiring_in(body.as_bytes().to_vec(), soft, hard)
}

fn expired(body: &str) -> Entry {
    let past = UNIX_EPOCH + Duration::from_secs(1_000);
    Entry::new(body.as_bytes().to_vec(), past, past)
}

// ============================================================================
// Freshness
// ============================================================================

#[tokio::test]
async fn test_fresh_hit_skips_network() {
    let transport = MockTransport::ok("network");
    let queue = queue(transport.clone(), DispatcherConfig::with_threads(1));
    queue.cache().put(KEY, entry("cached", Duration::from_secs(60), Duration::from_secs(120)));
    queue.start().unwrap();

    let (request, mut rx) = get(URL);
    queue.add(request);

    assert_eq!(next_body(&mut rx).await, ("cached".to_string(), false));
    wait_until(|| queue.in_flight() == 0).await;
    assert_eq!(transport.calls(), 0);
    assert_eq!(queue.snapshot().counters.cache_hits, 1);
}

#[tokio::test]
async fn test_soft_stale_delivers_intermediate_then_refresh() {
    let transport = MockTransport::ok("network");
    let queue = queue(transport.clone(), DispatcherConfig::with_threads(1));
    queue.cache().put(KEY, entry("cached", Duration::ZERO, Duration::from_secs(120)));
    queue.start().unwrap();

    let (request, mut rx) = get(URL);
    let handle = queue.add(request);

    assert_eq!(next_body(&mut rx).await, ("cached".to_string(), true));
    assert_eq!(next_body(&mut rx).await, ("network".to_string(), false));
    assert_eq!(transport.calls(), 1);
    wait_until(|| handle.meta().is_finished()).await;
    assert!(handle.meta().markers().iter().any(|m| m == "cache-hit-refresh-needed"));
}

#[tokio::test]
async fn test_hard_stale_strict_revalidates_with_etag() {
    let transport = MockTransport::new(Ok(RawResponse::new(304)));
    let queue = queue(transport.clone(), DispatcherConfig::with_threads(1));
    queue.cache().put(KEY, expired("cached").with_etag("\"v1\""));
    queue.start().unwrap();

    let (request, mut rx) = get(URL);
    queue.add(request);

    // No intermediate delivery: the expired entry only feeds the conditional request.
    assert_eq!(next_body(&mut rx).await, ("cached".to_string(), false));
    let seen = transport.seen();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].headers.get("If-None-Match"), Some("\"v1\""));
}

#[tokio::test]
async fn test_hard_stale_always_deliver_serves_then_refreshes() {
    let transport = MockTransport::ok("network");
    let config = DispatcherConfig {
        stale_policy: StalePolicy::AlwaysDeliver,
        ..DispatcherConfig::with_threads(1)
    };
    let queue = queue(transport.clone(), config);
    queue.cache().put(KEY, expired("cached"));
    queue.start().unwrap();

    let (request, mut rx) = get(URL);
    queue.add(request);

    assert_eq!(next_body(&mut rx).await, ("cached".to_string(), true));
    assert_eq!(next_body(&mut rx).await, ("network".to_string(), false));
}

#[tokio::test]
async fn test_soft_stale_refresh_not_modified_still_gets_final_delivery() {
    let transport = MockTransport::new(Ok(
        RawResponse::new(304).with_header("Cache-Control", "max-age=300")
    ));
    let queue = queue(transport.clone(), DispatcherConfig::with_threads(1));
    queue
        .cache()
        .put(KEY, entry("cached", Duration::ZERO, Duration::from_secs(120)).with_etag("abc"));
    queue.start().unwrap();

    let (request, mut rx) = get(URL);
    let handle = queue.add(request);

    assert_eq!(next_body(&mut rx).await, ("cached".to_string(), true));
    assert_eq!(next_body(&mut rx).await, ("cached".to_string(), false));
    wait_until(|| handle.meta().is_finished()).await;
    assert!(handle.meta().markers().iter().any(|m| m == "not-modified"));

    // The 304's max-age refreshed the stored entry.
    let refreshed = queue.cache().get(KEY).unwrap();
    assert_eq!(refreshed.freshness(SystemTime::now()), Freshness::Fresh);
    assert_eq!(refreshed.data, b"cached");
}

// ============================================================================
// Writes, parse failures and clearing
// ============================================================================

#[tokio::test]
async fn test_network_result_is_cached_for_next_request() {
    let transport = MockTransport::new(Ok(RawResponse::new(200)
        .with_header("Cache-Control", "max-age=60")
        .with_header("ETag", "\"e1\"")
        .with_body("network")));
    let queue = queue(transport.clone(), DispatcherConfig::with_threads(1));
    queue.start().unwrap();

    let before = SystemTime::now();
    let (first, mut rx1) = get(URL);
    queue.add(first);
    assert_eq!(next_body(&mut rx1).await, ("network".to_string(), false));
    let after = SystemTime::now();

    let stored = queue.cache().get(KEY).unwrap();
    assert_eq!(stored.etag.as_deref(), Some("\"e1\""));
    let max_age = Duration::from_secs(60);
    assert!(stored.soft_ttl() >= before + max_age);
    assert!(stored.soft_ttl() <= after + max_age);

    let (second, mut rx2) = get(URL);
    queue.add(second);
    assert_eq!(next_body(&mut rx2).await, ("network".to_string(), false));
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn test_no_store_response_is_not_cached() {
    let transport = MockTransport::new(Ok(RawResponse::new(200)
        .with_header("Cache-Control", "no-store")
        .with_body("secret")));
    let queue = queue(transport.clone(), DispatcherConfig::with_threads(1));
    queue.start().unwrap();

    let (request, mut rx) = get(URL);
    queue.add(request);
    next_body(&mut rx).await;
    assert!(queue.cache().get(KEY).is_none());
}

#[tokio::test]
async fn test_unparseable_cached_entry_falls_back_to_network() {
    let transport = MockTransport::ok(r#"{"ok":true}"#);
    let queue = queue(transport.clone(), DispatcherConfig::with_threads(1));
    queue.cache().put(KEY, entry("not json", Duration::from_secs(60), Duration::from_secs(120)));
    queue.start().unwrap();

    let (listener, mut rx) = channel_listener::<serde_json::Value>();
    let request = Request::get(URL, JsonParser::new()).listener(listener).build().unwrap();
    queue.add(request);

    let delivery = tokio::time::timeout(Duration::from_secs(3), rx.recv())
        .await
        .unwrap()
        .unwrap()
        .into_result()
        .unwrap();
    assert_eq!(delivery.value["ok"], true);
    assert!(!delivery.intermediate);
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn test_huge_max_age_is_delivered_and_cached() {
    let transport = MockTransport::new(Ok(RawResponse::new(200)
        .with_header("Cache-Control", "max-age=18446744073709551615")
        .with_body("forever")));
    let queue = queue(transport.clone(), DispatcherConfig::with_threads(1));
    queue.start().unwrap();

    let (request, mut rx) = get(URL);
    queue.add(request);
    assert_eq!(next_body(&mut rx).await, ("forever".to_string(), false));

    let stored = queue.cache().get(KEY).unwrap();
    assert_eq!(stored.freshness(SystemTime::now()), Freshness::Fresh);
}

#[tokio::test]
async fn test_unsolicited_not_modified_is_an_error_and_not_cached() {
    let transport = MockTransport::new(Ok(RawResponse::new(304)));
    let queue = queue(transport.clone(), DispatcherConfig::with_threads(1));
    queue.start().unwrap();

    let (request, mut rx) = get(URL);
    queue.add(request);
    let err = next(&mut rx).await.into_result().unwrap_err();
    assert_eq!(err.status(), Some(304));
    wait_until(|| queue.in_flight() == 0).await;
    assert!(queue.cache().get(KEY).is_none());
}

#[tokio::test]
async fn test_clear_cache_runs_callback_and_empties_cache() {
    let transport = MockTransport::ok("network");
    let queue = queue(transport.clone(), DispatcherConfig::with_threads(1));
    queue.cache().put(KEY, entry("cached", Duration::from_secs(60), Duration::from_secs(120)));

    let cleared = Arc::new(AtomicBool::new(false));
    let flag = cleared.clone();
    queue.clear_cache(Some(Box::new(move || flag.store(true, Ordering::SeqCst))));
    queue.start().unwrap();
    wait_until(|| cleared.load(Ordering::SeqCst)).await;
    assert!(queue.cache().get(KEY).is_none());

    let (request, mut rx) = get(URL);
    queue.add(request);
    assert_eq!(next_body(&mut rx).await, ("network".to_string(), false));
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn test_clear_cache_orders_ahead_of_queued_triage() {
    let transport = MockTransport::ok("network");
    let queue = queue(transport.clone(), DispatcherConfig::with_threads(1));
    queue.cache().put(KEY, entry("cached", Duration::from_secs(60), Duration::from_secs(120)));

    // Both queued before the dispatchers run; the clear is Immediate.
    let (request, mut rx) = get(URL);
    queue.add(request);
    queue.clear_cache(None);
    queue.start().unwrap();

    match next(&mut rx).await.into_result() {
        Ok(response) => assert_eq!(response.value, "network"),
        Err(e) => panic!("unexpected error: {e}"),
    }
    assert_eq!(transport.calls(), 1);
}
