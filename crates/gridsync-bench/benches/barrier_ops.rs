//! Criterion benchmarks for the partitioned sync barrier.

use std::hint::black_box;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};
use gridsync_core::{NextEvent, Timestamp};
use gridsync_engine::{partition, ItemSync, PartitionedSync};

fn bench_dispatch(c: &mut Criterion) {
    let items: Vec<u64> = (0..10_000).collect();
    for threads in [1, 2, 8] {
        let sync: ItemSync<u64> = Arc::new(|item: &u64, t1: Timestamp| {
            NextEvent::hard(Timestamp(t1.0 + 1 + (*item % 7) as i64))
        });
        let pool = PartitionedSync::new(items.clone(), threads, 64, sync).unwrap();
        let mut t = 0;
        c.bench_function(&format!("dispatch_10k_{threads}t"), |b| {
            b.iter(|| {
                t += 1;
                black_box(pool.sync(Timestamp(t)).unwrap())
            });
        });
    }
}

fn bench_partition(c: &mut Criterion) {
    c.bench_function("partition_100k", |b| {
        b.iter(|| black_box(partition(black_box(100_000), 64, 4)));
    });
}

criterion_group!(benches, bench_dispatch, bench_partition);
criterion_main!(benches);
