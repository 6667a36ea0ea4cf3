use criterion::{Criterion, criterion_group, criterion_main};
use event_store::{
    AggregateId, AppendRequest, EventStore, ExpectedNonce, GlobalNonce, MemoryEventStore,
    NewEvent, Nonce,
};

fn make_event(name: &str) -> NewEvent {
    NewEvent::new(
        name,
        "application/json",
        br#"{"order_id":"00000000-0000-0000-0000-000000000001"}"#.to_vec(),
    )
}

fn bench_append_single_event(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("event_store/append_single_event", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = MemoryEventStore::new();
                store
                    .append(AppendRequest::new(
                        AggregateId::new(),
                        "Order",
                        ExpectedNonce::Any,
                        vec![make_event("OrderPlaced")],
                    ))
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_append_batch_10(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("event_store/append_batch_10", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = MemoryEventStore::new();
                let events = (0..10).map(|_| make_event("OrderPlaced")).collect();
                store
                    .append(AppendRequest::new(
                        AggregateId::new(),
                        "Order",
                        ExpectedNonce::Any,
                        events,
                    ))
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_append_with_nonce_check(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("event_store/append_with_nonce_check", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = MemoryEventStore::new();
                store
                    .append(AppendRequest::new(
                        AggregateId::new(),
                        "Order",
                        ExpectedNonce::NoStream,
                        vec![make_event("OrderPlaced")],
                    ))
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_read_stream_100(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = MemoryEventStore::new();
    let aggregate_id = AggregateId::new();

    // Pre-populate with 100 events
    rt.block_on(async {
        let events = (0..100).map(|_| make_event("OrderPlaced")).collect();
        store
            .append(AppendRequest::new(
                aggregate_id,
                "Order",
                ExpectedNonce::NoStream,
                events,
            ))
            .await
            .unwrap();
    });

    c.bench_function("event_store/read_stream_100", |b| {
        b.iter(|| {
            rt.block_on(async {
                store
                    .read_stream(aggregate_id, Nonce::initial(), usize::MAX)
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_read_all_1000(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = MemoryEventStore::new();

    // Pre-populate with 1000 events across 10 aggregates
    rt.block_on(async {
        for _ in 0..10 {
            let events = (0..100).map(|_| make_event("OrderPlaced")).collect();
            store
                .append(AppendRequest::new(
                    AggregateId::new(),
                    "Order",
                    ExpectedNonce::NoStream,
                    events,
                ))
                .await
                .unwrap();
        }
    });

    c.bench_function("event_store/read_all_1000", |b| {
        b.iter(|| {
            rt.block_on(async {
                let records = store
                    .read_all(GlobalNonce::start(), usize::MAX)
                    .await
                    .unwrap();
                assert_eq!(records.len(), 1000);
            });
        });
    });
}

criterion_group!(
    benches,
    bench_append_single_event,
    bench_append_batch_10,
    bench_append_with_nonce_check,
    bench_read_stream_100,
    bench_read_all_1000,
);
criterion_main!(benches);
