use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use flate2::write::ZlibEncoder;
use gitcore_hash::hasher::Hasher;
use gitcore_hash::ObjectId;
use gitcore_object::{header, Object, ObjectType};

use crate::{LooseError, LooseStore};

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Create a uniquely named scratch file inside `dir`.
pub(crate) fn create_temp(dir: &Path) -> io::Result<(PathBuf, File)> {
    fs::create_dir_all(dir)?;
    loop {
        let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let path = dir.join(format!("tmp_obj_{}_{n}", std::process::id()));
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Move a finished temp file to its content address. Losing a race to
/// another writer of the same object is success.
pub(crate) fn install(tmp: &Path, dest: &Path) -> Result<(), LooseError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(tmp, fs::Permissions::from_mode(0o444))?;
    }
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    match fs::rename(tmp, dest) {
        Ok(()) => Ok(()),
        Err(_) if dest.is_file() => {
            let _ = fs::remove_file(tmp);
            Ok(())
        }
        Err(e) => {
            let _ = fs::remove_file(tmp);
            Err(e.into())
        }
    }
}

impl LooseStore {
    /// Store `data`; writing an object that already exists is a no-op.
    pub fn write(&self, kind: ObjectType, data: &[u8]) -> Result<ObjectId, LooseError> {
        let oid = Hasher::hash_object(self.algo, kind.name(), data)?;
        let dest = self.object_path(&oid);
        if dest.is_file() {
            tracing::trace!(%oid, "loose object already present");
            return Ok(oid);
        }

        let (tmp, file) = create_temp(&self.objects_dir)?;
        let result = (|| -> io::Result<()> {
            let mut encoder = ZlibEncoder::new(file, self.compression);
            encoder.write_all(&header::write_header(kind, data.len()))?;
            encoder.write_all(data)?;
            encoder.finish()?.sync_all()
        })();
        if let Err(e) = result {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        install(&tmp, &dest)?;
        tracing::debug!(%oid, %kind, size = data.len(), "wrote loose object");
        Ok(oid)
    }

    pub fn write_object(&self, obj: &Object) -> Result<ObjectId, LooseError> {
        self.write(obj.object_type(), &obj.serialize_content())
    }
}
