use std::fs;
use std::path::Path;

use bstr::{BStr, BString, ByteSlice};
use gitcore_hash::hasher::Hasher;
use gitcore_hash::{HashAlgorithm, ObjectId};
use gitcore_index::{AddOptions, Index, IndexEntry, IndexError, Stage};
use gitcore_object::{FileMode, ObjectType};
use gitcore_odb::ObjectDatabase;
use gitcore_utils::{Classify, Control, ErrorClass};
use proptest::prelude::*;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_env_filter("warn").with_test_writer().try_init();
}

fn oid(fill: u8) -> ObjectId {
    ObjectId::from_bytes(&[fill; 20], HashAlgorithm::Sha1).unwrap()
}

fn entry(path: &str, fill: u8) -> IndexEntry {
    IndexEntry::new(path, oid(fill), FileMode::Regular)
}

fn sample() -> Index {
    let mut index = Index::new();
    for (i, path) in ["README", "src/lib.rs", "src/main.rs", "src/util/mod.rs", "tests/a.rs"]
        .iter()
        .enumerate()
    {
        index.add(entry(path, i as u8 + 1)).unwrap();
    }
    index
}

fn paths(index: &Index) -> Vec<(BString, Stage)> {
    index.iter().map(|e| (e.path.clone(), e.stage)).collect()
}

struct Repo {
    _dir: tempfile::TempDir,
    work: std::path::PathBuf,
    odb: ObjectDatabase,
}

fn repo() -> Repo {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let work = dir.path().join("work");
    let objects = work.join(".git/objects");
    fs::create_dir_all(&objects).unwrap();
    let odb = ObjectDatabase::open(&objects).unwrap();
    Repo { _dir: dir, work, odb }
}

fn write_file(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

#[test]
fn every_version_survives_a_write_and_read() {
    for version in 2..=4 {
        let mut index = sample();
        index.set_version(version).unwrap();
        let bytes = index.to_bytes().unwrap();
        let back = Index::from_bytes(&bytes, HashAlgorithm::Sha1).unwrap();
        assert_eq!(back.version(), version);
        assert_eq!(paths(&back), paths(&index));
        assert_eq!(back.iter().map(|e| e.oid).collect::<Vec<_>>(), index.iter().map(|e| e.oid).collect::<Vec<_>>());
    }
}

#[test]
fn extended_flags_upgrade_version_two() {
    let mut index = sample();
    let mut e = entry("sparse.txt", 9);
    e.flags.skip_worktree = true;
    index.add(e).unwrap();
    let back = Index::from_bytes(&index.to_bytes().unwrap(), HashAlgorithm::Sha1).unwrap();
    assert_eq!(back.version(), 3);
    assert!(back.get(BStr::new("sparse.txt"), Stage::Normal).unwrap().flags.skip_worktree);
}

#[test]
fn checksum_tracks_disk_and_detects_outside_writes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("index");
    let mut index = Index::open(&path, HashAlgorithm::Sha1).unwrap();
    assert!(index.is_empty());
    assert_eq!(index.checksum(), None);

    index.add(entry("a", 1)).unwrap();
    index.write().unwrap();
    let first = index.checksum().unwrap();
    assert!(!index.read_if_changed().unwrap());

    let mut other = Index::open(&path, HashAlgorithm::Sha1).unwrap();
    assert_eq!(other.checksum(), Some(first));
    other.add(entry("b", 2)).unwrap();
    other.write().unwrap();

    assert!(index.read_if_changed().unwrap());
    assert_eq!(index.len(), 2);
    assert_ne!(index.checksum(), Some(first));
    assert_eq!(index.checksum(), other.checksum());
}

#[test]
fn corrupt_trailer_is_rejected() {
    let mut bytes = sample().to_bytes().unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xff;
    let err = Index::from_bytes(&bytes, HashAlgorithm::Sha1).unwrap_err();
    assert!(matches!(err, IndexError::ChecksumMismatch { .. }));
    assert_eq!(err.class(), ErrorClass::Corrupt);
}

fn with_extension(index: &Index, signature: &[u8; 4], data: &[u8]) -> Vec<u8> {
    let mut bytes = index.to_bytes().unwrap();
    bytes.truncate(bytes.len() - 20);
    bytes.extend_from_slice(signature);
    bytes.extend_from_slice(&(data.len() as u32).to_be_bytes());
    bytes.extend_from_slice(data);
    let trailer = Hasher::digest(HashAlgorithm::Sha1, &bytes).unwrap();
    bytes.extend_from_slice(trailer.as_bytes());
    bytes
}

#[test]
fn optional_extensions_are_preserved() {
    let index = sample();
    let bytes = with_extension(&index, b"ZVND", b"vendor data");
    let back = Index::from_bytes(&bytes, HashAlgorithm::Sha1).unwrap();
    assert_eq!(back.unknown_extensions().len(), 1);
    assert_eq!(&back.unknown_extensions()[0].signature, b"ZVND");

    let again = Index::from_bytes(&back.to_bytes().unwrap(), HashAlgorithm::Sha1).unwrap();
    assert_eq!(again.unknown_extensions()[0].data, b"vendor data");
}

#[test]
fn required_extensions_are_refused() {
    let bytes = with_extension(&sample(), b"link", b"\0\0\0\0");
    let err = Index::from_bytes(&bytes, HashAlgorithm::Sha1).unwrap_err();
    assert!(matches!(err, IndexError::RequiredExtension(_)));
    assert_eq!(err.class(), ErrorClass::Corrupt);
}

#[test]
fn held_lock_blocks_writers() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("index");
    fs::write(dir.path().join("index.lock"), b"").unwrap();
    let mut index = sample();
    let err = index.write_to(&path).unwrap_err();
    assert_eq!(err.class(), ErrorClass::Locked);
    assert!(!path.exists());
}

#[test]
fn tree_round_trip_through_the_odb() {
    let r = repo();
    let mut index = Index::new();
    for (path, body) in [("README", "hi\n"), ("src/lib.rs", "lib\n"), ("src/a.b", "ab\n"), ("src/a/x", "x\n")] {
        let e = IndexEntry::new(path, ObjectId::NULL_SHA1, FileMode::Regular);
        index.add_from_buffer(&r.odb, e, body.as_bytes()).unwrap();
    }
    let tree = index.write_tree(&r.odb).unwrap();
    assert_eq!(index.cache_tree().unwrap().root_oid(), Some(tree));

    let root = r.odb.read_tree(&tree).unwrap();
    let names: Vec<_> = root.iter().map(|e| e.name.to_str_lossy().into_owned()).collect();
    assert_eq!(names, ["README", "src"]);

    let mut fresh = Index::new();
    fresh.read_tree(&r.odb, &tree).unwrap();
    assert_eq!(paths(&fresh), paths(&index));
    assert_eq!(fresh.write_tree(&r.odb).unwrap(), tree);
}

#[test]
fn file_and_directory_of_one_name_displace_each_other() {
    let r = repo();
    let mut index = Index::new();
    index.add_from_buffer(&r.odb, entry("a", 0), b"file\n").unwrap();
    index.add_from_buffer(&r.odb, entry("a/b", 0), b"nested\n").unwrap();
    index.add_from_buffer(&r.odb, entry("a.txt", 0), b"sibling\n").unwrap();
    assert_eq!(
        paths(&index),
        [(BString::from("a.txt"), Stage::Normal), (BString::from("a/b"), Stage::Normal)]
    );

    index.add_from_buffer(&r.odb, entry("a", 0), b"file again\n").unwrap();
    assert_eq!(
        paths(&index),
        [(BString::from("a"), Stage::Normal), (BString::from("a.txt"), Stage::Normal)]
    );

    let tree = index.write_tree(&r.odb).unwrap();
    let names: Vec<_> = r.odb.read_tree(&tree).unwrap().iter().map(|e| e.name.to_str_lossy().into_owned()).collect();
    assert_eq!(names, ["a", "a.txt"]);
}

#[test]
fn add_all_replaces_a_file_that_became_a_directory() {
    let r = repo();
    write_file(&r.work, "a", "file\n");
    let mut index = Index::new();
    index.add_by_path(&r.odb, &r.work, BStr::new("a")).unwrap();

    fs::remove_file(r.work.join("a")).unwrap();
    write_file(&r.work, "a/b", "nested\n");
    index.add_all(&r.odb, &r.work, &["a"], &AddOptions::default(), |_, _| Control::Continue).unwrap();

    assert_eq!(paths(&index), [(BString::from("a/b"), Stage::Normal)]);
    let tree = index.write_tree(&r.odb).unwrap();
    let root = r.odb.read_tree(&tree).unwrap();
    assert_eq!(root.iter().map(|e| e.mode).collect::<Vec<_>>(), [FileMode::Tree]);
}

#[test]
fn duplicate_tree_names_are_refused() {
    let r = repo();
    let blob = r.odb.write(ObjectType::Blob, b"x\n").unwrap();
    let mut sub = gitcore_object::Tree::new();
    sub.entries.push(gitcore_object::TreeEntry::new(FileMode::Regular, "b", blob));
    let sub = r.odb.write(ObjectType::Tree, &sub.serialize_content()).unwrap();
    let mut bad = gitcore_object::Tree::new();
    bad.entries.push(gitcore_object::TreeEntry::new(FileMode::Regular, "a", blob));
    bad.entries.push(gitcore_object::TreeEntry::new(FileMode::Tree, "a", sub));
    let bad = r.odb.write(ObjectType::Tree, &bad.serialize_content()).unwrap();

    let mut index = Index::new();
    index.read_tree(&r.odb, &bad).unwrap();
    index.add_from_buffer(&r.odb, entry("z", 0), b"z\n").unwrap();
    let err = index.write_tree(&r.odb).unwrap_err();
    assert!(matches!(err, IndexError::DuplicateTreeEntry { ref name, .. } if name == "a"));
    assert_eq!(err.class(), ErrorClass::Corrupt);
}

#[test]
fn changed_entry_rewrites_only_its_directories() {
    let r = repo();
    let mut index = Index::new();
    for path in ["a/one", "b/two"] {
        let e = IndexEntry::new(path, ObjectId::NULL_SHA1, FileMode::Regular);
        index.add_from_buffer(&r.odb, e, path.as_bytes()).unwrap();
    }
    let before = index.write_tree(&r.odb).unwrap();
    let b_tree = index.cache_tree().unwrap().root.find(b"b").unwrap().oid;

    let e = IndexEntry::new("a/one", ObjectId::NULL_SHA1, FileMode::Regular);
    index.add_from_buffer(&r.odb, e, b"changed").unwrap();
    let cache = index.cache_tree().unwrap();
    assert!(!cache.root.is_valid());
    assert!(cache.root.find(b"b").unwrap().is_valid());

    let after = index.write_tree(&r.odb).unwrap();
    assert_ne!(before, after);
    assert_eq!(index.cache_tree().unwrap().root.find(b"b").unwrap().oid, b_tree);
}

#[test]
fn conflicts_block_tree_writes_until_resolved() {
    let r = repo();
    let mut index = Index::new();
    index.add(entry("clean", 1)).unwrap();
    index
        .add_conflict(Some(entry("f", 2)), Some(entry("f", 3)), Some(entry("f", 4)))
        .unwrap();
    assert!(index.has_conflicts());

    let err = index.write_tree(&r.odb).unwrap_err();
    assert_eq!(err.class(), ErrorClass::Conflict);

    let e = IndexEntry::new("f", ObjectId::NULL_SHA1, FileMode::Regular);
    index.add_from_buffer(&r.odb, e, b"resolved\n").unwrap();
    assert!(!index.has_conflicts());
    let undo = index.resolve_undo().get(BStr::new("f")).unwrap();
    assert_eq!(undo.stages[1], Some((FileMode::Regular, oid(3))));

    // "clean" points at a blob we never wrote; trees only reference ids.
    index.write_tree(&r.odb).unwrap();
}

#[test]
fn missing_sides_and_cleanup() {
    let mut index = Index::new();
    index.add_conflict(None, Some(entry("gone", 1)), Some(entry("gone", 2))).unwrap();
    index.add_conflict(Some(entry("x", 1)), None, Some(entry("x", 2))).unwrap();
    let c = index.get_conflict(BStr::new("gone")).unwrap();
    assert!(c.ancestor.is_none());
    assert_eq!(c.ours.unwrap().stage, Stage::Ours);

    index.remove_conflict(BStr::new("gone")).unwrap();
    assert!(index.get_conflict(BStr::new("gone")).is_none());
    assert_eq!(index.remove_conflict(BStr::new("gone")).unwrap_err().class(), ErrorClass::NotFound);

    assert_eq!(index.cleanup_conflicts(), 2);
    assert!(!index.has_conflicts());
    assert!(index.is_empty());
}

#[test]
fn reuc_survives_disk() {
    let mut index = Index::new();
    index.add_conflict(Some(entry("p", 1)), Some(entry("p", 2)), None).unwrap();
    index.add(entry("p", 7)).unwrap();
    let back = Index::from_bytes(&index.to_bytes().unwrap(), HashAlgorithm::Sha1).unwrap();
    let undo = back.resolve_undo().get(BStr::new("p")).unwrap();
    assert_eq!(undo.stages, [Some((FileMode::Regular, oid(1))), Some((FileMode::Regular, oid(2))), None]);
}

#[test]
fn add_by_path_hashes_like_git() {
    let r = repo();
    write_file(&r.work, "hello.txt", "hello\n");
    let mut index = Index::new();
    let id = index.add_by_path(&r.odb, &r.work, BStr::new("hello.txt")).unwrap();
    assert_eq!(id, Hasher::hash_object(HashAlgorithm::Sha1, "blob", b"hello\n").unwrap());
    let e = index.get(BStr::new("hello.txt"), Stage::Normal).unwrap();
    assert_eq!(e.stat.size, 6);
    assert!(e.is_stat_clean(&fs::symlink_metadata(r.work.join("hello.txt")).unwrap()));
    assert_eq!(r.odb.read_header(&id).unwrap(), (ObjectType::Blob, 6));

    let err = index.add_by_path(&r.odb, &r.work, BStr::new("../escape")).unwrap_err();
    assert_eq!(err.class(), ErrorClass::InvalidArgument);
}

#[cfg(unix)]
#[test]
fn symlinks_and_executables_keep_their_modes() {
    use std::os::unix::fs::{symlink, PermissionsExt};
    let r = repo();
    write_file(&r.work, "run.sh", "#!/bin/sh\n");
    fs::set_permissions(r.work.join("run.sh"), fs::Permissions::from_mode(0o755)).unwrap();
    symlink("run.sh", r.work.join("link")).unwrap();

    let mut index = Index::new();
    index.add_by_path(&r.odb, &r.work, BStr::new("run.sh")).unwrap();
    let link = index.add_by_path(&r.odb, &r.work, BStr::new("link")).unwrap();
    assert_eq!(index.get(BStr::new("run.sh"), Stage::Normal).unwrap().mode, FileMode::Executable);
    assert_eq!(index.get(BStr::new("link"), Stage::Normal).unwrap().mode, FileMode::Symlink);
    assert_eq!(r.odb.read(&link).unwrap().data, b"run.sh");
}

#[test]
fn add_all_follows_pathspecs_and_ignores() {
    let r = repo();
    write_file(&r.work, "src/a.rs", "a");
    write_file(&r.work, "src/b.o", "b");
    write_file(&r.work, "docs/guide.md", "g");
    write_file(&r.work, "top.rs", "t");

    let mut index = Index::new();
    let options = AddOptions {
        ignore: vec!["*.o".into()],
        ..AddOptions::default()
    };
    let mut seen = Vec::new();
    let staged = index
        .add_all(&r.odb, &r.work, &["src", "*.rs"], &options, |path, matched| {
            seen.push((path.to_owned(), matched.map(|m| m.to_owned())));
            Control::Continue
        })
        .unwrap();
    assert_eq!(staged, 2);
    assert_eq!(
        seen,
        vec![
            (BString::from("src/a.rs"), Some(BString::from("src"))),
            (BString::from("top.rs"), Some(BString::from("*.rs"))),
        ]
    );
    assert!(index.get(BStr::new(".git/HEAD"), Stage::Normal).is_none());

    let forced = AddOptions { force: true, ..options };
    index.add_all(&r.odb, &r.work, &[":!docs"], &forced, |_, _| Control::Continue).unwrap();
    assert!(index.get(BStr::new("src/b.o"), Stage::Normal).is_some());
    assert!(index.get(BStr::new("docs/guide.md"), Stage::Normal).is_none());
}

#[test]
fn add_all_skip_abort_and_rerun_converge() {
    let r = repo();
    for name in ["a", "b", "c", "d"] {
        write_file(&r.work, name, name);
    }
    let mut index = Index::new();
    let err = index
        .add_all(&r.odb, &r.work, &[] as &[&str], &AddOptions::default(), |path, _| match path.as_bytes() {
            b"a" => Control::Skip,
            b"c" => Control::Abort,
            _ => Control::Continue,
        })
        .unwrap_err();
    assert!(matches!(err, IndexError::Cancelled));
    assert_eq!(paths(&index), vec![(BString::from("b"), Stage::Normal)]);

    index.add_all(&r.odb, &r.work, &[] as &[&str], &AddOptions::default(), |_, _| Control::Continue).unwrap();
    index.add_all(&r.odb, &r.work, &[] as &[&str], &AddOptions::default(), |_, _| Control::Continue).unwrap();
    let names: Vec<_> = index.iter().map(|e| e.path.to_string()).collect();
    assert_eq!(names, ["a", "b", "c", "d"]);
}

#[test]
fn unmatched_pathspec_fails_before_staging() {
    let r = repo();
    write_file(&r.work, "present", "p");
    let mut index = Index::new();
    let options = AddOptions {
        check_pathspec: true,
        ..AddOptions::default()
    };
    let err = index
        .add_all(&r.odb, &r.work, &["present", "absent"], &options, |_, _| Control::Continue)
        .unwrap_err();
    assert!(matches!(&err, IndexError::PathspecNoMatch(p) if p == "absent"));
    assert_eq!(err.class(), ErrorClass::NotFound);
    assert!(index.is_empty());
}

proptest! {
    #[test]
    fn entries_stay_sorted_and_unique(ops in prop::collection::vec(("[a-c]{1,2}(/[a-c]{1,2})?", 0u8..4, any::<bool>()), 1..40)) {
        let mut index = Index::new();
        for (path, stage, remove) in ops {
            let stage = Stage::from_u8(stage).unwrap();
            if remove {
                index.remove(BStr::new(&path), stage);
            } else {
                let _ = index.add(entry(&path, 1).with_stage(stage));
            }
        }
        let keys: Vec<_> = index.iter().map(|e| (e.path.clone(), e.stage)).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        sorted.dedup();
        prop_assert_eq!(&keys, &sorted);
        for e in index.iter().filter(|e| e.stage == Stage::Normal) {
            prop_assert_eq!(index.get_all(e.path.as_bstr()).len(), 1);
        }
        let back = Index::from_bytes(&index.to_bytes().unwrap(), HashAlgorithm::Sha1).unwrap();
        prop_assert_eq!(paths(&back), keys);
    }
}
