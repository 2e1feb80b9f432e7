use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ds_core::record::SessionRecord;
use ds_persist::{InMemoryPersister, Persister};
use std::time::Duration;

fn bench_memory_persister(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let cache = InMemoryPersister::new(10_000, Duration::from_secs(600));
    let records: Vec<SessionRecord> = (0..1000)
        .map(|i| SessionRecord::create_with_id(format!("session-{i}"), 600))
        .collect();

    c.bench_function("memory_persist_1000", |b| {
        b.iter(|| {
            rt.block_on(async {
                for r in &records {
                    cache.persist(r).await.unwrap();
                }
            })
        })
    });

    c.bench_function("memory_fetch_1000", |b| {
        b.iter(|| {
            rt.block_on(async {
                for i in 0..1000 {
                    black_box(cache.fetch(&format!("session-{i}")).await.unwrap());
                }
            })
        })
    });

    let small = InMemoryPersister::new(100, Duration::from_secs(600));
    c.bench_function("memory_persist_with_eviction_1000", |b| {
        b.iter(|| {
            rt.block_on(async {
                for r in &records {
                    small.persist(r).await.unwrap();
                }
            })
        })
    });
}

criterion_group!(benches, bench_memory_persister);
criterion_main!(benches);
