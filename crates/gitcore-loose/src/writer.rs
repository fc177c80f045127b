use std::fs::{self, File};
use std::io::{self, Write};
use std::path::PathBuf;

use flate2::write::ZlibEncoder;
use gitcore_hash::hasher::Hasher;
use gitcore_hash::ObjectId;
use gitcore_object::{header, ObjectType};

use crate::write::{create_temp, install};
use crate::{LooseError, LooseStore};

/// Incremental writer for one object whose size is known up front.
///
/// Bytes are deflated to a temp file and hashed as they arrive, so the
/// object is never held in memory. The id is known only after
/// [`commit`](Self::commit). Dropping an uncommitted writer deletes the
/// temp file.
pub struct LooseWriter {
    objects_dir: PathBuf,
    tmp: PathBuf,
    encoder: Option<ZlibEncoder<File>>,
    hasher: Option<Hasher>,
    declared: u64,
    written: u64,
}

impl LooseWriter {
    pub fn declared_size(&self) -> u64 {
        self.declared
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    /// Finish the stream and install the object. Fails with `SizeMismatch`
    /// if the byte count differs from the declared size.
    pub fn commit(mut self) -> Result<ObjectId, LooseError> {
        if self.written != self.declared {
            return Err(LooseError::SizeMismatch {
                declared: self.declared,
                written: self.written,
            });
        }
        let (Some(encoder), Some(hasher)) = (self.encoder.take(), self.hasher.take()) else {
            return Err(io::Error::other("loose writer already finished").into());
        };
        encoder.finish()?.sync_all()?;
        let oid = hasher.finalize()?;

        let (dir, file) = oid.loose_path_parts();
        let dest = self.objects_dir.join(dir).join(file);
        if dest.is_file() {
            fs::remove_file(&self.tmp)?;
        } else {
            install(&self.tmp, &dest)?;
        }
        self.tmp = PathBuf::new();
        tracing::debug!(%oid, size = self.written, "committed streamed loose object");
        Ok(oid)
    }
}

impl Write for LooseWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written + buf.len() as u64 > self.declared {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "write exceeds declared object size",
            ));
        }
        let encoder = self
            .encoder
            .as_mut()
            .ok_or_else(|| io::Error::other("loose writer already finished"))?;
        let n = encoder.write(buf)?;
        if let Some(hasher) = self.hasher.as_mut() {
            hasher.update(&buf[..n]);
        }
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.encoder.as_mut() {
            Some(e) => e.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for LooseWriter {
    fn drop(&mut self) {
        if !self.tmp.as_os_str().is_empty() {
            self.encoder.take();
            let _ = fs::remove_file(&self.tmp);
        }
    }
}

impl LooseStore {
    /// Open a streaming writer for an object of `size` bytes.
    pub fn writer(&self, kind: ObjectType, size: u64) -> Result<LooseWriter, LooseError> {
        let (tmp, file) = create_temp(&self.objects_dir)?;
        let mut encoder = ZlibEncoder::new(file, self.compression);
        let hdr = header::write_header(kind, size as usize);
        if let Err(e) = encoder.write_all(&hdr) {
            drop(encoder);
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(LooseWriter {
            objects_dir: self.objects_dir.clone(),
            tmp,
            encoder: Some(encoder),
            hasher: Some(Hasher::for_object(self.algo, kind.name(), size)),
            declared: size,
            written: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gitcore_hash::HashAlgorithm;

    fn temp_count(dir: &std::path::Path) -> usize {
        fs::read_dir(dir)
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().starts_with("tmp_obj_"))
            .count()
    }

    #[test]
    fn streamed_object_matches_buffered_write() {
        let dir = tempfile::tempdir().unwrap();
        let store = LooseStore::open(dir.path(), HashAlgorithm::Sha1);
        let mut w = store.writer(ObjectType::Blob, 12).unwrap();
        w.write_all(b"some ").unwrap();
        w.write_all(b"content").unwrap();
        let oid = w.commit().unwrap();
        assert_eq!(oid, store.write(ObjectType::Blob, b"some content").unwrap());
        assert_eq!(temp_count(dir.path()), 0);
    }

    #[test]
    fn short_stream_is_rejected_and_cleaned() {
        let dir = tempfile::tempdir().unwrap();
        let store = LooseStore::open(dir.path(), HashAlgorithm::Sha1);
        let mut w = store.writer(ObjectType::Blob, 10).unwrap();
        w.write_all(b"abc").unwrap();
        assert!(matches!(
            w.commit(),
            Err(LooseError::SizeMismatch { declared: 10, written: 3 })
        ));
        assert_eq!(temp_count(dir.path()), 0);
    }

    #[test]
    fn overlong_write_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = LooseStore::open(dir.path(), HashAlgorithm::Sha1);
        let mut w = store.writer(ObjectType::Blob, 2).unwrap();
        assert!(w.write_all(b"abc").is_err());
    }

    #[test]
    fn dropped_writer_discards_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = LooseStore::open(dir.path(), HashAlgorithm::Sha1);
        {
            let mut w = store.writer(ObjectType::Blob, 4).unwrap();
            w.write_all(b"data").unwrap();
            assert_eq!(temp_count(dir.path()), 1);
        }
        assert_eq!(temp_count(dir.path()), 0);
    }
}
