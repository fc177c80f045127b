use std::io::{Read, Write};
use std::sync::Arc;
use std::thread;

use flate2::read::ZlibDecoder;
use gitcore_hash::HashAlgorithm;
use gitcore_loose::LooseStore;
use gitcore_object::ObjectType;
use proptest::prelude::*;

#[test]
fn on_disk_bytes_are_deflated_header_and_content() {
    let dir = tempfile::tempdir().unwrap();
    let store = LooseStore::open(dir.path(), HashAlgorithm::Sha1);
    let oid = store.write(ObjectType::Blob, b"some content").unwrap();

    let file = std::fs::File::open(dir.path().join("f0").join("eec86f614944a81f87d879ebdc9a79aea0d7ea")).unwrap();
    let mut inflated = Vec::new();
    ZlibDecoder::new(file).read_to_end(&mut inflated).unwrap();
    assert_eq!(inflated, b"blob 12\0some content");
    assert!(store.contains(&oid));
    assert!(!store.contains(&HashAlgorithm::Sha1.null_oid()));
}

#[test]
fn concurrent_writers_of_one_object_agree() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(LooseStore::open(dir.path(), HashAlgorithm::Sha1));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = Arc::clone(&store);
            thread::spawn(move || store.write(ObjectType::Blob, b"shared payload").unwrap())
        })
        .collect();
    let ids: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(ids.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(store.iter().unwrap().count(), 1);
}

#[test]
fn large_streamed_blob() {
    let dir = tempfile::tempdir().unwrap();
    let store = LooseStore::open(dir.path(), HashAlgorithm::Sha256);
    let chunk = vec![0x42u8; 64 * 1024];
    let mut writer = store.writer(ObjectType::Blob, (chunk.len() * 16) as u64).unwrap();
    for _ in 0..16 {
        writer.write_all(&chunk).unwrap();
    }
    let oid = writer.commit().unwrap();
    assert_eq!(oid.algorithm(), HashAlgorithm::Sha256);
    assert_eq!(store.read_header(&oid).unwrap(), Some((ObjectType::Blob, chunk.len() * 16)));
    assert!(store.read_verified(&oid).unwrap().is_some());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn write_then_read_returns_same_kind_and_bytes(data in proptest::collection::vec(any::<u8>(), 0..2048)) {
        let dir = tempfile::tempdir().unwrap();
        let store = LooseStore::open(dir.path(), HashAlgorithm::Sha1);
        let first = store.write(ObjectType::Blob, &data).unwrap();
        let second = store.write(ObjectType::Blob, &data).unwrap();
        prop_assert_eq!(first, second);
        let raw = store.read(&first).unwrap().unwrap();
        prop_assert_eq!(raw.kind, ObjectType::Blob);
        prop_assert_eq!(raw.data, data);
    }
}
