use axum::http::{HeaderMap, HeaderValue, Method};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::time::Duration;

use payment_api::auth::AuthenticatedCaller;
use payment_api::idempotency::{
    classify, IdempotencyRecord, IdempotencyStore, InMemoryIdempotencyStore, IDEMPOTENCY_KEY_HEADER,
};
use payment_api::observability::LatencyTimer;

fn benchmark_classifier(c: &mut Criterion) {
    let mut group = c.benchmark_group("classifier");

    let caller = AuthenticatedCaller::new("user-1");
    let mut headers = HeaderMap::new();
    headers.insert(IDEMPOTENCY_KEY_HEADER, HeaderValue::from_static("  Order-2026-0001  "));

    group.bench_function("eligible_post", |b| {
        b.iter(|| black_box(classify(&Method::POST, &headers, Some(&caller))))
    });

    group.bench_function("bypassed_get", |b| {
        b.iter(|| black_box(classify(&Method::GET, &headers, Some(&caller))))
    });

    group.finish();
}

fn benchmark_memory_store(c: &mut Criterion) {
    let mut group = c.benchmark_group("memory_store");
    group.measurement_time(Duration::from_secs(10));
    let runtime = tokio::runtime::Runtime::new().unwrap();

    for size in [100, 1000, 10000].iter() {
        let store = InMemoryIdempotencyStore::new();
        runtime.block_on(async {
            for i in 0..*size {
                let record = IdempotencyRecord::new("user-1", format!("key-{}", i), 201, "{}", None);
                store.try_insert(&record).await.unwrap();
            }
        });

        group.bench_with_input(BenchmarkId::new("lookup_hit", size), size, |b, &size| {
            b.to_async(&runtime).iter(|| {
                let store = store.clone();
                async move {
                    let key = format!("key-{}", size / 2);
                    black_box(store.lookup("user-1", &key).await.unwrap())
                }
            });
        });

        group.bench_with_input(BenchmarkId::new("insert_conflict", size), size, |b, _| {
            let record = IdempotencyRecord::new("user-1", "key-0", 201, "{}", None);
            b.to_async(&runtime).iter(|| {
                let store = store.clone();
                let record = record.clone();
                async move { black_box(store.try_insert(&record).await.unwrap()) }
            });
        });
    }

    group.finish();
}

fn benchmark_latency_timer(c: &mut Criterion) {
    c.bench_function("latency_timer", |b| {
        b.iter(|| {
            let timer = LatencyTimer::new();
            black_box(timer.elapsed_ms())
        })
    });
}

criterion_group!(
    benches,
    benchmark_classifier,
    benchmark_memory_store,
    benchmark_latency_timer
);
criterion_main!(benches);
