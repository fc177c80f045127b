use criterion::{black_box, criterion_group, criterion_main, Criterion};
use gitcore_diff::algorithm::{diff_lines, split_lines};
use gitcore_diff::{diff_buffers, DiffAlgorithm, DiffOptions};

fn source(lines: usize, every: usize) -> (String, String) {
    let mut old = String::new();
    let mut new = String::new();
    for i in 0..lines {
        let line = format!("    let value_{i} = compute({i}, {});\n", i % 17);
        old.push_str(&line);
        if i % every == 0 {
            new.push_str(&format!("    let value_{i} = compute_again({i});\n"));
        } else {
            new.push_str(&line);
        }
        if i % 50 == 0 {
            // Repeated lines that only unique-line anchoring handles well.
            old.push_str("}\n");
            new.push_str("}\n\n");
        }
    }
    (old, new)
}

fn bench_algorithms(c: &mut Criterion) {
    let (old, new) = source(5000, 40);
    let a = split_lines(old.as_bytes());
    let b = split_lines(new.as_bytes());
    for (name, algo) in [
        ("myers_5k", DiffAlgorithm::Myers),
        ("minimal_5k", DiffAlgorithm::Minimal),
        ("patience_5k", DiffAlgorithm::Patience),
    ] {
        c.bench_function(name, |bench| bench.iter(|| diff_lines(black_box(&a), black_box(&b), algo, false)));
    }
}

fn bench_patch(c: &mut Criterion) {
    let (old, new) = source(2000, 25);
    let opts = DiffOptions::default();
    c.bench_function("patch_text_2k", |bench| {
        bench.iter(|| {
            diff_buffers(Some(old.as_bytes()), "f", Some(new.as_bytes()), "f", &opts)
                .unwrap()
                .to_text()
        })
    });
}

criterion_group!(benches, bench_algorithms, bench_patch);
criterion_main!(benches);
