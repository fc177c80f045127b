use criterion::{criterion_group, criterion_main, Criterion};
use gitcore_hash::HashAlgorithm;
use gitcore_object::ObjectType;
use gitcore_pack::{Indexer, IndexerOptions, NoBases, PackFile, PackWriter};

fn build_pack(dir: &std::path::Path) -> (PackFile, gitcore_hash::ObjectId, gitcore_hash::ObjectId, Vec<u8>) {
    let mut w = PackWriter::new(HashAlgorithm::Sha1);
    let mut content: Vec<u8> = b"fn main() {}\n".repeat(200);
    let (first, mut off) = w.add_object(ObjectType::Blob, &content).unwrap();
    let mut last = first;
    for i in 0..20 {
        let mut next = content.clone();
        next.extend_from_slice(format!("// revision {i}\n").as_bytes());
        let (id, o) = w.add_ofs_delta(off, &content, ObjectType::Blob, &next).unwrap();
        content = next;
        off = o;
        last = id;
    }
    for i in 0..500 {
        w.add_object(ObjectType::Blob, format!("small blob {i}").as_bytes()).unwrap();
    }
    let finished = w.finish().unwrap();
    let raw = finished.pack.clone();
    std::fs::write(dir.join("bench.pack"), &finished.pack).unwrap();
    std::fs::write(dir.join("bench.idx"), &finished.index).unwrap();
    let pack = PackFile::open(dir.join("bench.pack"), HashAlgorithm::Sha1).unwrap();
    (pack, first, last, raw)
}

fn bench_reads(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let (pack, first, last, _) = build_pack(dir.path());

    c.bench_function("index_lookup", |b| b.iter(|| pack.index().position(&last)));
    c.bench_function("read_whole_object", |b| b.iter(|| pack.read(&first, &NoBases).unwrap()));
    c.bench_function("read_delta_chain_20", |b| b.iter(|| pack.read(&last, &NoBases).unwrap()));
}

fn bench_indexer(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let (_, _, _, raw) = build_pack(dir.path());

    c.bench_function("index_pack_4k_chunks", |b| {
        b.iter(|| {
            let out = tempfile::tempdir().unwrap();
            let mut indexer = Indexer::new(out.path(), IndexerOptions::default());
            for chunk in raw.chunks(4096) {
                indexer.append(chunk).unwrap();
            }
            indexer.commit().unwrap()
        })
    });
}

criterion_group!(benches, bench_reads, bench_indexer);
criterion_main!(benches);
