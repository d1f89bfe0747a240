//! Tests for request cancellation.

mod common;

use std::time::Duration;

use common::{get, next_body, queue, wait_until, MockTransport};
use courier::request::{channel_listener, Request, StringParser};
use courier::scheduler::{DispatcherConfig, Priority};

#[tokio::test]
async fn test_cancel_before_dispatch_suppresses_callbacks() {
    let transport = MockTransport::ok("body");
    let queue = queue(transport.clone(), DispatcherConfig::with_threads(1));

    let (request, mut rx) = get("http://a.test/never");
    let handle = queue.add(request);
    handle.cancel();
    assert!(handle.is_cancelled());
    queue.start().unwrap();

    wait_until(|| handle.meta().is_finished()).await;
    assert!(rx.try_recv().is_err());
    assert_eq!(transport.calls(), 0);
    assert!(!handle.meta().has_had_response_delivered());
    assert_eq!(queue.snapshot().counters.cancelled, 1);
}

#[tokio::test]
async fn test_cancel_during_network_suppresses_delivery() {
    let transport = MockTransport::ok("late");
    transport.set_delay(Duration::from_millis(150));
    let queue = queue(transport.clone(), DispatcherConfig::with_threads(1));
    queue.start().unwrap();

    let (request, mut rx) = get("http://a.test/late");
    let handle = queue.add(request);
    wait_until(|| transport.calls() == 1).await;
    handle.cancel();

    wait_until(|| handle.meta().is_finished()).await;
    assert!(rx.try_recv().is_err());
    assert!(handle.meta().markers().iter().any(|m| m == "network-discard-cancelled"));
}

#[tokio::test]
async fn test_cancel_all_tagged() {
    let transport = MockTransport::ok("body");
    let queue = queue(transport.clone(), DispatcherConfig::with_threads(1));

    let mut tagged = Vec::new();
    for i in 0..3 {
        let (listener, rx) = channel_listener::<String>();
        let request = Request::get(format!("http://a.test/feed/{i}"), StringParser)
            .tag("feed")
            .listener(listener)
            .build()
            .unwrap();
        queue.add(request);
        tagged.push(rx);
    }
    let (other, mut other_rx) = get("http://a.test/profile");
    queue.add(other);

    assert_eq!(queue.cancel_all_tagged("feed"), 3);
    queue.start().unwrap();

    assert_eq!(next_body(&mut other_rx).await, ("body".to_string(), false));
    wait_until(|| queue.in_flight() == 0).await;
    for mut rx in tagged {
        assert!(rx.try_recv().is_err());
    }
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn test_cancel_all_with_filter() {
    let transport = MockTransport::ok("body");
    let queue = queue(transport.clone(), DispatcherConfig::with_threads(1));

    for (i, priority) in [Priority::Low, Priority::Low, Priority::High].into_iter().enumerate() {
        let request = Request::get(format!("http://a.test/item/{i}"), StringParser)
            .priority(priority)
            .should_cache(false)
            .build()
            .unwrap();
        queue.add(request);
    }
    assert_eq!(queue.cancel_all(|meta| meta.priority() == Priority::Low), 2);
    queue.start().unwrap();

    wait_until(|| queue.in_flight() == 0).await;
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn test_cancel_after_delivery_is_harmless() {
    let transport = MockTransport::ok("done");
    let queue = queue(transport.clone(), DispatcherConfig::with_threads(1));
    queue.start().unwrap();

    let (request, mut rx) = get("http://a.test/done");
    let handle = queue.add(request);
    assert_eq!(next_body(&mut rx).await, ("done".to_string(), false));
    wait_until(|| handle.meta().is_finished()).await;

    handle.cancel();
    assert!(handle.meta().has_had_response_delivered());
    assert_eq!(queue.cancel_all(|_| true), 0);
}
