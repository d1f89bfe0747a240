//! Dispatch throughput benchmarks.
//!
//! Measures priority queue operations and the cost of pushing a request
//! through the cache dispatcher to delivery.

use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use courier::cache::{Cache, Entry, MemoryCache};
use courier::error::TransportError;
use courier::network::{BasicNetwork, RawResponse, Transport, TransportRequest};
use courier::request::{Request, StringParser};
use courier::scheduler::{DispatcherConfig, Priority, PriorityQueue, RequestQueue};

struct StaticTransport;

impl Transport for StaticTransport {
    fn execute(&self, _request: &TransportRequest<'_>) -> Result<RawResponse, TransportError> {
        Ok(RawResponse::new(200).with_body("network"))
    }
}

fn bench_priority_queue_push(c: &mut Criterion) {
    let mut group = c.benchmark_group("priority_queue_push");

    for (name, queue_size) in [("empty", 0u64), ("half_full", 500), ("near_full", 900)] {
        let mut queue: PriorityQueue<u64> = PriorityQueue::new();
        for i in 0..queue_size {
            queue.push(i, Priority::from((i % 4) as u8), i);
        }

        group.throughput(Throughput::Elements(1));
        group.bench_function(BenchmarkId::new("push", name), |b| {
            let mut sequence = queue_size;
            b.iter(|| {
                queue.push(black_box(sequence), Priority::Normal, sequence);
                sequence += 1;
                let _ = queue.pop();
            })
        });
    }

    group.finish();
}

fn bench_priority_queue_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("priority_queue_drain");

    for batch in [16u64, 256, 4096] {
        group.throughput(Throughput::Elements(batch));
        group.bench_function(BenchmarkId::new("mixed_priority", batch), |b| {
            b.iter(|| {
                let mut queue: PriorityQueue<u64> = PriorityQueue::new();
                for i in 0..batch {
                    queue.push(i, Priority::from((i % 4) as u8), i);
                }
                while let Some(item) = queue.pop() {
                    black_box(item);
                }
            })
        });
    }

    group.finish();
}

fn bench_cache_hit_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_hit_dispatch");

    const KEYS: usize = 64;
    let cache = Arc::new(MemoryCache::default());
    for i in 0..KEYS {
        let entry = Entry::expiring_in(
            b"cached".to_vec(),
            Duration::from_secs(3600),
            Duration::from_secs(7200),
        );
        cache.put(&format!("GET http://bench.test/{i}"), entry);
    }

    let queue = RequestQueue::builder()
        .network(Arc::new(BasicNetwork::new(Arc::new(StaticTransport))))
        .cache(cache)
        .config(DispatcherConfig::with_threads(1))
        .build()
        .expect("network configured");
    queue.start().expect("dispatchers start");

    for burst in [1usize, 16, 64] {
        group.throughput(Throughput::Elements(burst as u64));
        group.bench_function(BenchmarkId::new("burst", burst), |b| {
            b.iter(|| {
                let (tx, rx) = mpsc::channel();
                for i in 0..burst {
                    let tx = tx.clone();
                    let url = format!("http://bench.test/{}", i % KEYS);
                    let request = Request::get(url, StringParser)
                        .on_response(move |response| {
                            let _ = tx.send(response.value.len());
                        })
                        .build()
                        .expect("valid url");
                    queue.add(request);
                }
                for _ in 0..burst {
                    black_box(rx.recv_timeout(Duration::from_secs(5)).expect("delivery"));
                }
            })
        });
    }

    group.finish();
    queue.stop();
}

criterion_group!(
    benches,
    bench_priority_queue_push,
    bench_priority_queue_drain,
    bench_cache_hit_dispatch,
);
criterion_main!(benches);
