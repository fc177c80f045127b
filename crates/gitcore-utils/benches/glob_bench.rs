use bstr::ByteSlice;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use gitcore_utils::glob::{glob_match, GlobFlags};

fn bench_glob(c: &mut Criterion) {
    c.bench_function("glob_star_suffix", |b| {
        b.iter(|| {
            glob_match(
                black_box(b"src/*.rs".as_bstr()),
                black_box(b"src/lockfile.rs".as_bstr()),
                GlobFlags::PATHNAME,
            )
        })
    });

    c.bench_function("glob_double_star", |b| {
        b.iter(|| {
            glob_match(
                black_box(b"**/tests/**/*.rs".as_bstr()),
                black_box(b"crates/gitcore-index/tests/fixtures/deep/read.rs".as_bstr()),
                GlobFlags::PATHNAME,
            )
        })
    });
}

criterion_group!(benches, bench_glob);
criterion_main!(benches);
