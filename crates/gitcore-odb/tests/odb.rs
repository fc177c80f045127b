use std::cell::Cell;
use std::fs;
use std::io::Write;
use std::path::Path;

use gitcore_hash::hasher::Hasher;
use gitcore_hash::{HashAlgorithm, ObjectId};
use gitcore_loose::LooseStore;
use gitcore_object::ObjectType;
use gitcore_odb::{IdRequest, ObjectDatabase, OdbError, OdbOptions, PackDirBackend};
use gitcore_pack::{IndexerOptions, PackWriter, MAX_DELTA_CHAIN_DEPTH};
use gitcore_utils::{Classify, Control, ErrorClass};
use proptest::prelude::*;

const SHA1: HashAlgorithm = HashAlgorithm::Sha1;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("warn")
        .with_test_writer()
        .try_init();
}

fn objects_dir(root: &Path) -> std::path::PathBuf {
    let dir = root.join("objects");
    fs::create_dir_all(dir.join("pack")).unwrap();
    fs::create_dir_all(dir.join("info")).unwrap();
    dir
}

#[test]
fn blob_id_covers_type_and_length_header() {
    init_tracing();
    let tmp = tempfile::tempdir().unwrap();
    let odb = ObjectDatabase::open(objects_dir(tmp.path())).unwrap();

    let id = odb.write(ObjectType::Blob, b"some content").unwrap();
    assert_eq!(id, Hasher::digest(SHA1, b"blob 12\0some content").unwrap());
    assert!(odb.exists(&id));
    assert!(!odb.exists(&ObjectId::NULL_SHA1));

    let obj = odb.read(&id).unwrap();
    assert_eq!(obj.kind, ObjectType::Blob);
    assert_eq!(obj.data, b"some content");
    assert_eq!(odb.read_header(&id).unwrap(), (ObjectType::Blob, 12));
}

#[test]
fn second_write_is_a_no_op() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = objects_dir(tmp.path());
    let odb = ObjectDatabase::open(&dir).unwrap();

    let first = odb.write(ObjectType::Blob, b"twice").unwrap();
    let path = LooseStore::open(&dir, SHA1).object_path(&first);
    let before = fs::metadata(&path).unwrap().modified().unwrap();
    let second = odb.write(ObjectType::Blob, b"twice").unwrap();
    assert_eq!(first, second);
    assert_eq!(fs::metadata(&path).unwrap().modified().unwrap(), before);
}

#[test]
fn missing_and_corrupt_are_distinct() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = objects_dir(tmp.path());
    let odb = ObjectDatabase::open(&dir).unwrap();

    let absent = Hasher::hash_object(SHA1, "blob", b"never written").unwrap();
    let err = odb.read(&absent).unwrap_err();
    assert!(matches!(err, OdbError::NotFound(_)));
    assert_eq!(err.class(), ErrorClass::NotFound);

    let path = LooseStore::open(&dir, SHA1).object_path(&absent);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, b"definitely not zlib").unwrap();
    let err = odb.read(&absent).unwrap_err();
    assert_eq!(err.class(), ErrorClass::Corrupt);
}

#[test]
fn prefix_lookup_reports_ambiguity() {
    let tmp = tempfile::tempdir().unwrap();
    let odb = ObjectDatabase::open(objects_dir(tmp.path())).unwrap();

    // Find two blobs sharing their first four hex digits.
    let mut by_prefix = std::collections::HashMap::new();
    let (a, b) = (0u32..)
        .find_map(|i| {
            let data = format!("candidate {i}");
            let id = odb.write(ObjectType::Blob, data.as_bytes()).unwrap();
            let key = id.to_hex_short(4);
            match by_prefix.insert(key, id) {
                Some(other) if other != id => Some((other, id)),
                _ => None,
            }
        })
        .unwrap();

    let short = a.to_hex_short(4);
    let err = odb.exists_prefix(&short).unwrap_err();
    assert!(matches!(err, OdbError::Ambiguous { count, .. } if count >= 2));
    assert_eq!(err.class(), ErrorClass::Ambiguous);

    // A longer prefix that separates them resolves.
    let len = (4..40)
        .find(|&n| a.to_hex_short(n) != b.to_hex_short(n))
        .unwrap();
    assert_eq!(odb.exists_prefix(&a.to_hex_short(len)).unwrap(), a);
    assert_eq!(odb.exists_prefix(&b.to_hex()).unwrap(), b);

    assert_eq!(odb.exists_prefix("abc").unwrap_err().class(), ErrorClass::InvalidArgument);
}

#[test]
fn expand_ids_reports_each_failure() {
    let tmp = tempfile::tempdir().unwrap();
    let odb = ObjectDatabase::open(objects_dir(tmp.path())).unwrap();
    let blob = odb.write(ObjectType::Blob, b"expand me").unwrap();
    let absent = Hasher::hash_object(SHA1, "blob", b"absent").unwrap();

    let results = odb.expand_ids(&[
        IdRequest::new(blob.to_hex_short(10)),
        IdRequest::of_kind(blob.to_hex_short(10), ObjectType::Commit),
        IdRequest::new(absent.to_hex()),
        IdRequest::of_kind(blob.to_hex(), ObjectType::Blob),
        IdRequest::new("zz"),
    ]);

    assert_eq!(results.len(), 5);
    assert_eq!(results[0].id, blob);
    assert_eq!(results[0].kind, Some(ObjectType::Blob));
    assert!(results[0].is_resolved());

    assert!(results[1].id.is_null());
    assert_eq!(results[1].error, Some(ErrorClass::InvalidArgument));
    assert!(results[2].id.is_null());
    assert_eq!(results[2].error, Some(ErrorClass::NotFound));
    assert_eq!(results[3].id, blob);
    assert_eq!(results[4].error, Some(ErrorClass::InvalidArgument));
}

#[test]
fn write_stream_commits_and_discards() {
    let tmp = tempfile::tempdir().unwrap();
    let odb = ObjectDatabase::open(objects_dir(tmp.path())).unwrap();
    let content = b"streamed in three pieces".to_vec();

    let mut stream = odb.write_stream(ObjectType::Blob, content.len() as u64).unwrap();
    for piece in content.chunks(9) {
        stream.write_all(piece).unwrap();
    }
    let id = stream.commit().unwrap();
    assert_eq!(id, Hasher::hash_object(SHA1, "blob", &content).unwrap());
    assert_eq!(odb.read(&id).unwrap().data, content);

    let before: Vec<_> = odb.iter_ids().collect::<Result<_, _>>().unwrap();
    {
        let mut abandoned = odb.write_stream(ObjectType::Blob, 100).unwrap();
        abandoned.write_all(b"never finished").unwrap();
    }
    let after: Vec<_> = odb.iter_ids().collect::<Result<_, _>>().unwrap();
    assert_eq!(before, after);

    let mut short = odb.write_stream(ObjectType::Blob, 10).unwrap();
    short.write_all(b"abc").unwrap();
    assert_eq!(short.commit().unwrap_err().class(), ErrorClass::InvalidArgument);
}

#[test]
fn for_each_id_stops_on_abort() {
    let tmp = tempfile::tempdir().unwrap();
    let odb = ObjectDatabase::open(objects_dir(tmp.path())).unwrap();
    for i in 0..5 {
        odb.write(ObjectType::Blob, format!("object {i}").as_bytes()).unwrap();
    }

    let mut all = Vec::new();
    odb.for_each_id(|id| {
        all.push(*id);
        Control::Continue
    })
    .unwrap();
    all.sort();
    all.dedup();
    assert_eq!(all.len(), 5);

    let seen = Cell::new(0);
    let err = odb
        .for_each_id(|_| {
            seen.set(seen.get() + 1);
            if seen.get() == 2 {
                Control::Abort
            } else {
                Control::Continue
            }
        })
        .unwrap_err();
    assert_eq!(err.class(), ErrorClass::Cancelled);
    assert_eq!(seen.get(), 2);
}

#[test]
fn objects_survive_a_trip_through_a_pack() {
    init_tracing();
    let src = tempfile::tempdir().unwrap();
    let source = ObjectDatabase::open(objects_dir(src.path())).unwrap();
    let mut ids = Vec::new();
    for i in 0..20 {
        let body = format!("file number {i}\n").repeat(i + 1);
        ids.push(source.write(ObjectType::Blob, body.as_bytes()).unwrap());
    }

    let mut writer = PackWriter::new(SHA1);
    let mut ordered: Vec<ObjectId> = source.iter_ids().collect::<Result<_, _>>().unwrap();
    ordered.sort();
    for id in &ordered {
        let obj = source.read(id).unwrap();
        writer.add_object(obj.kind, &obj.data).unwrap();
    }
    let pack = writer.finish().unwrap();

    let dst = tempfile::tempdir().unwrap();
    let dest_dir = objects_dir(dst.path());
    let dest = ObjectDatabase::open(&dest_dir).unwrap();
    let progress = dest.index_pack(&pack.pack[..]).unwrap();
    assert_eq!(progress.indexed_objects, 20);

    // A store backed by nothing but the resulting pack.
    let mut packed_only = ObjectDatabase::new(OdbOptions::default());
    packed_only.add_backend(
        PackDirBackend::open(dest_dir.join("pack"), SHA1, MAX_DELTA_CHAIN_DEPTH).unwrap(),
        1,
    );
    for id in &ids {
        assert!(packed_only.exists(id));
        assert_eq!(packed_only.read(id).unwrap(), source.read(id).unwrap());
    }
    assert!(packed_only.write(ObjectType::Blob, b"x").unwrap_err().class() == ErrorClass::InvalidArgument);
}

#[test]
fn thin_pack_resolves_against_local_objects() {
    let tmp = tempfile::tempdir().unwrap();
    let odb = ObjectDatabase::open(objects_dir(tmp.path())).unwrap();
    let base: Vec<u8> = (0..200).flat_map(|i| format!("base line {i}\n").into_bytes()).collect();
    let base_id = odb.write(ObjectType::Blob, &base).unwrap();

    let mut target = base.clone();
    target.extend_from_slice(b"one more line\n");
    let mut writer = PackWriter::new(SHA1);
    let (target_id, _) = writer
        .add_ref_delta(base_id, &base, ObjectType::Blob, &target)
        .unwrap();
    let pack = writer.finish().unwrap();

    let mut indexer = odb.pack_indexer(IndexerOptions::default()).unwrap();
    indexer.append(&pack.pack).unwrap();
    let progress = indexer.commit().unwrap();
    assert_eq!(progress.local_objects, 1);
    drop(indexer);

    odb.refresh().unwrap();
    let obj = odb.read(&target_id).unwrap();
    assert_eq!(obj.data, target);
}

#[test]
fn backend_priority_decides_reads() {
    let tmp = tempfile::tempdir().unwrap();
    let low = tmp.path().join("low");
    let high = tmp.path().join("high");

    let mut odb = ObjectDatabase::new(OdbOptions::default());
    odb.add_backend(LooseStore::open(&low, SHA1), 1);
    odb.add_backend(LooseStore::open(&high, SHA1), 5);

    let id = odb.write(ObjectType::Blob, b"goes to the highest writable").unwrap();
    assert!(LooseStore::open(&high, SHA1).contains(&id));
    assert!(!LooseStore::open(&low, SHA1).contains(&id));
}

#[test]
fn empty_database_has_nowhere_to_write() {
    let odb = ObjectDatabase::new(OdbOptions::default());
    let err = odb.write(ObjectType::Blob, b"data").unwrap_err();
    assert!(matches!(err, OdbError::NoWritableBackend));
    assert!(matches!(odb.pack_indexer(IndexerOptions::default()), Err(OdbError::NoDirectory)));
}

#[test]
fn typed_reads_check_the_kind() {
    let tmp = tempfile::tempdir().unwrap();
    let odb = ObjectDatabase::open(objects_dir(tmp.path())).unwrap();
    let blob = odb.write(ObjectType::Blob, b"not a tree").unwrap();
    assert!(matches!(
        odb.read_tree(&blob),
        Err(OdbError::WrongKind { actual: ObjectType::Blob, .. })
    ));
    let cached = odb.read_cached(&blob).unwrap();
    assert_eq!(&cached.data[..], b"not a tree");
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn write_then_read_returns_the_same_bytes(data in proptest::collection::vec(any::<u8>(), 0..2048)) {
        let tmp = tempfile::tempdir().unwrap();
        let odb = ObjectDatabase::open(objects_dir(tmp.path())).unwrap();
        let a = odb.write(ObjectType::Blob, &data).unwrap();
        let b = odb.write(ObjectType::Blob, &data).unwrap();
        prop_assert_eq!(a, b);
        let obj = odb.read(&a).unwrap();
        prop_assert_eq!(obj.kind, ObjectType::Blob);
        prop_assert_eq!(obj.data, data);
    }
}
