use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use lapring::{Queue, ReaderCursor};

/// One in-place publish followed by one consume, reader in lockstep.
fn bench_publish_consume(c: &mut Criterion) {
    let queue = Queue::<u64, 4096>::new_boxed(None);
    let mut cursor = ReaderCursor::new();

    c.bench_function("publish_consume", |b| {
        b.iter(|| {
            queue.push(black_box(42));
            black_box(queue.recv(&mut cursor).copied())
        });
    });
}

/// Same cycle through the claiming (multi-producer) write path.
fn bench_locked_publish_consume(c: &mut Criterion) {
    let queue = Queue::<u64, 4096>::new_boxed(None);
    let mut cursor = ReaderCursor::new();

    c.bench_function("locked_publish_consume", |b| {
        b.iter(|| {
            queue.push_locked(black_box(42));
            black_box(queue.recv(&mut cursor).copied())
        });
    });
}

/// The cost a polling reader pays per empty check.
fn bench_empty_poll(c: &mut Criterion) {
    let queue = Queue::<u64, 4096>::new_boxed(None);
    let mut cursor = ReaderCursor::new();

    c.bench_function("empty_poll", |b| {
        b.iter(|| black_box(queue.recv(&mut cursor).is_ready()));
    });
}

criterion_group!(
    benches,
    bench_publish_consume,
    bench_locked_publish_consume,
    bench_empty_poll
);
criterion_main!(benches);
