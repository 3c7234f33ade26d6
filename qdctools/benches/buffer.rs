use criterion::{black_box, criterion_group, criterion_main, Criterion};

use qdctools::{AppendBuffer, ListElement422};

fn push_clear(c: &mut Criterion) {
    let mut b = AppendBuffer::with_elements(1 << 16, ListElement422::SIZE).unwrap();
    c.bench_function("push_65536", |bench| {
        bench.iter(|| {
            b.clear();
            for i in 0..(1u32 << 16) {
                b.push(&ListElement422 { time: i, channel: 1, charge: 2 }).unwrap();
            }
            black_box(b.raw_bytes().len())
        })
    });
}

fn iterate(c: &mut Criterion) {
    let mut b = AppendBuffer::with_elements(1 << 16, ListElement422::SIZE).unwrap();
    for i in 0..(1u32 << 16) {
        b.push(&ListElement422 { time: i, channel: 1, charge: 2 }).unwrap();
    }
    c.bench_function("iter_as_65536", |bench| {
        bench.iter(|| b.iter_as::<ListElement422>().map(|e| e.time as u64).sum::<u64>())
    });
}

criterion_group!(benches, push_clear, iterate);
criterion_main!(benches);
