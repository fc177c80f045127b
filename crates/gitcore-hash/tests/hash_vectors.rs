use gitcore_hash::hasher::Hasher;
use gitcore_hash::{HashAlgorithm, ObjectId, Prefix};

fn sha1_object(kind: &str, data: &[u8]) -> String {
    Hasher::hash_object(HashAlgorithm::Sha1, kind, data).unwrap().to_hex()
}

#[test]
fn raw_digests() {
    assert_eq!(
        Hasher::digest(HashAlgorithm::Sha1, b"").unwrap().to_hex(),
        "da39a3ee5e6b4b0d3255bfef95601890afd80709"
    );
    assert_eq!(
        Hasher::digest(HashAlgorithm::Sha256, b"hello world").unwrap().to_hex(),
        "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
    );
}

#[test]
fn blob_with_content() {
    assert_eq!(
        sha1_object("blob", b"some content"),
        "f0eec86f614944a81f87d879ebdc9a79aea0d7ea"
    );
    assert_eq!(
        sha1_object("blob", b"hello world"),
        "95d09f2b10159347eece71399a7e2e907ea3df4f"
    );
}

#[test]
fn well_known_empty_objects() {
    assert_eq!(sha1_object("blob", b""), "e69de29bb2d1d6434b8b29ae775ad8c2e48c5391");
    assert_eq!(sha1_object("tree", b""), "4b825dc642cb6eb9a060e54bf8d69288fbee4904");
    assert_eq!(
        Hasher::hash_object(HashAlgorithm::Sha256, "blob", b"").unwrap().to_hex(),
        "473a0f4c3be8a93681a267e3b1e9a7dcda1185436fe141f7749120a303721813"
    );
}

#[test]
fn streamed_writes_match() {
    use std::io::Write;
    let mut h = Hasher::for_object(HashAlgorithm::Sha1, "blob", 12);
    h.write_all(b"some ").unwrap();
    h.write_all(b"content").unwrap();
    assert_eq!(h.finalize().unwrap().to_hex(), "f0eec86f614944a81f87d879ebdc9a79aea0d7ea");
}

#[test]
fn prefix_of_known_id() {
    let id: ObjectId = "f0eec86f614944a81f87d879ebdc9a79aea0d7ea".parse().unwrap();
    let prefix = Prefix::from_hex("f0eec86", HashAlgorithm::Sha1).unwrap();
    assert!(prefix.matches(&id));
    assert_eq!(prefix.hex_len(), 7);
    assert_eq!(id.to_hex_short(7), prefix.to_string());
}
