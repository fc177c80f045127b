use criterion::{black_box, criterion_group, criterion_main, Criterion};
use gitcore_pack::delta;

fn sample(len: usize, stride: usize) -> (Vec<u8>, Vec<u8>) {
    let source: Vec<u8> = (0..len).map(|i| (i * 31 % 253) as u8).collect();
    let mut target = source.clone();
    for i in (0..target.len()).step_by(stride) {
        target[i] ^= 0x5a;
    }
    (source, target)
}

fn bench_apply(c: &mut Criterion) {
    for (name, len) in [("delta_apply_4k", 4096), ("delta_apply_256k", 256 * 1024)] {
        let (source, target) = sample(len, 1024);
        let d = delta::compute(&source, &target);
        c.bench_function(name, |b| b.iter(|| delta::apply(black_box(&source), black_box(&d)).unwrap()));
    }
}

fn bench_compute(c: &mut Criterion) {
    let (source, target) = sample(64 * 1024, 2048);
    c.bench_function("delta_compute_64k", |b| {
        b.iter(|| delta::compute(black_box(&source), black_box(&target)))
    });
}

criterion_group!(benches, bench_apply, bench_compute);
criterion_main!(benches);
