//! Streaming pack indexer.
//!
//! Bytes are pushed in with [`Indexer::append`] as they arrive and spooled
//! to a temporary file in the target directory. Whole objects are hashed
//! while they inflate; deltas are only located during append and are
//! resolved at [`Indexer::commit`], walking from each base down through the
//! deltas that depend on it so that only one chain is held in memory.

use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use flate2::write::ZlibEncoder;
use flate2::{Compression, Decompress, FlushDecompress, Status};
use gitcore_hash::hasher::Hasher;
use gitcore_hash::{HashAlgorithm, ObjectId};
use gitcore_object::{ObjectType, RawObject};
use gitcore_utils::Control;
use memmap2::Mmap;

use crate::entry::{self, EntryHeader, EntryKind};
use crate::idx::{write_idx, IdxEntry};
use crate::pack::{pack_header, parse_pack_header};
use crate::write::{finalize_file, install_file, pack_file_names, temp_name, WrittenPack};
use crate::{delta, BaseLookup, NoBases, PackError, MAX_DELTA_CHAIN_DEPTH, PACK_HEADER_LEN};

const SCRATCH_LEN: usize = 16 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexerState {
    Created,
    Appending,
    Committing,
    Finalized,
    Failed,
}

/// Counters reported to the progress callback and returned by `append`
/// and `commit`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexerProgress {
    /// Entry count declared by the pack header.
    pub total_objects: u32,
    pub received_objects: u32,
    /// Objects whose id is known: whole objects plus resolved deltas.
    pub indexed_objects: u32,
    /// Thin-pack bases supplied by the base lookup.
    pub local_objects: u32,
    pub total_deltas: u32,
    pub indexed_deltas: u32,
    pub received_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexerOptions {
    /// Re-read every entry at commit, checking CRCs, object ids and the
    /// pack trailer.
    pub verify: bool,
    pub hash_algorithm: HashAlgorithm,
    /// Append thin-pack bases to the finished pack so it stands alone.
    pub keep_thin_bases: bool,
}

impl Default for IndexerOptions {
    fn default() -> Self {
        Self {
            verify: false,
            hash_algorithm: HashAlgorithm::Sha1,
            keep_thin_bases: false,
        }
    }
}

struct Slot {
    offset: u64,
    end: u64,
    header: EntryHeader,
    crc32: u32,
    oid: Option<ObjectId>,
}

struct Body {
    offset: u64,
    header: EntryHeader,
    zlib: Decompress,
    crc: crc32fast::Hasher,
    object: Option<Hasher>,
    inflated: u64,
}

enum Phase {
    PackHeader,
    EntryHeader,
    Body(Box<Body>),
    Trailer,
    Done,
}

type ProgressFn<'a> = Box<dyn FnMut(&IndexerProgress) -> Control + 'a>;

pub struct Indexer<'a> {
    dir: PathBuf,
    options: IndexerOptions,
    state: IndexerState,
    tmp_path: PathBuf,
    tmp: Option<File>,
    phase: Phase,
    pending: Vec<u8>,
    scratch: Vec<u8>,
    /// Pack offset of the first byte in `pending`.
    offset: u64,
    pack_hasher: Hasher,
    trailer: Option<ObjectId>,
    slots: Vec<Slot>,
    progress: IndexerProgress,
    bases: &'a dyn BaseLookup,
    on_progress: Option<ProgressFn<'a>>,
    written: Option<WrittenPack>,
}

impl fmt::Debug for Indexer<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Indexer")
            .field("dir", &self.dir)
            .field("state", &self.state)
            .field("progress", &self.progress)
            .finish_non_exhaustive()
    }
}

fn notify(callback: &mut Option<ProgressFn<'_>>, progress: &IndexerProgress) -> Result<(), PackError> {
    if let Some(f) = callback {
        if f(progress).is_abort() {
            return Err(PackError::Cancelled);
        }
    }
    Ok(())
}

impl<'a> Indexer<'a> {
    /// An indexer that will install its pack into `dir`.
    pub fn new(dir: impl AsRef<Path>, options: IndexerOptions) -> Self {
        let dir = dir.as_ref().to_path_buf();
        Self {
            tmp_path: dir.join(temp_name("tmp_pack")),
            dir,
            options,
            state: IndexerState::Created,
            tmp: None,
            phase: Phase::PackHeader,
            pending: Vec::new(),
            scratch: vec![0; SCRATCH_LEN],
            offset: 0,
            pack_hasher: Hasher::new(options.hash_algorithm),
            trailer: None,
            slots: Vec::new(),
            progress: IndexerProgress::default(),
            bases: &NoBases,
            on_progress: None,
            written: None,
        }
    }

    /// Where to look for delta bases missing from the stream.
    pub fn with_bases(mut self, bases: &'a dyn BaseLookup) -> Self {
        self.bases = bases;
        self
    }

    /// Called after each received object and each resolved delta;
    /// returning [`Control::Abort`] fails the indexer.
    pub fn on_progress(mut self, f: impl FnMut(&IndexerProgress) -> Control + 'a) -> Self {
        self.on_progress = Some(Box::new(f));
        self
    }

    pub fn state(&self) -> IndexerState {
        self.state
    }

    pub fn progress(&self) -> IndexerProgress {
        self.progress
    }

    /// The pack checksum, once finalized.
    pub fn name(&self) -> Option<ObjectId> {
        self.written.as_ref().map(|w| w.checksum)
    }

    pub fn written(&self) -> Option<&WrittenPack> {
        self.written.as_ref()
    }

    fn transition(&mut self, to: IndexerState) {
        tracing::debug!(from = ?self.state, to = ?to, "indexer state");
        self.state = to;
    }

    fn fail(&mut self) {
        self.tmp.take();
        if let Err(e) = fs::remove_file(&self.tmp_path) {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!(path = %self.tmp_path.display(), error = %e, "could not remove partial pack");
            }
        }
        self.transition(IndexerState::Failed);
    }

    /// Feed the next chunk of the pack stream.
    pub fn append(&mut self, chunk: &[u8]) -> Result<IndexerProgress, PackError> {
        match self.state {
            IndexerState::Created => {
                let file = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create_new(true)
                    .open(&self.tmp_path)?;
                self.tmp = Some(file);
                self.transition(IndexerState::Appending);
            }
            IndexerState::Appending => {}
            other => return Err(PackError::InvalidState(other)),
        }
        match self.feed(chunk) {
            Ok(()) => Ok(self.progress),
            Err(e) => {
                self.fail();
                Err(e)
            }
        }
    }

    fn feed(&mut self, chunk: &[u8]) -> Result<(), PackError> {
        if let Some(file) = self.tmp.as_mut() {
            file.write_all(chunk)?;
        }
        self.progress.received_bytes += chunk.len() as u64;

        let mut pending = std::mem::take(&mut self.pending);
        pending.extend_from_slice(chunk);
        let mut pos = 0;
        let result = loop {
            match self.step(&pending[pos..]) {
                Ok(Some(used)) => pos += used,
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            }
        };
        pending.drain(..pos);
        self.pending = pending;
        result
    }

    fn consume(&mut self, bytes: &[u8]) {
        self.pack_hasher.update(bytes);
        self.offset += bytes.len() as u64;
    }

    /// Advance the parser over `input`. `Ok(None)` means more bytes are
    /// needed; `Ok(Some(n))` means progress was made using `n` bytes.
    fn step(&mut self, input: &[u8]) -> Result<Option<usize>, PackError> {
        let algo = self.options.hash_algorithm;
        match std::mem::replace(&mut self.phase, Phase::Done) {
            Phase::PackHeader => {
                if input.len() < PACK_HEADER_LEN {
                    self.phase = Phase::PackHeader;
                    return Ok(None);
                }
                let count = parse_pack_header(input)?;
                self.consume(&input[..PACK_HEADER_LEN]);
                self.progress.total_objects = count;
                tracing::debug!(objects = count, "pack header received");
                self.phase = if count == 0 {
                    Phase::Trailer
                } else {
                    Phase::EntryHeader
                };
                Ok(Some(PACK_HEADER_LEN))
            }
            Phase::EntryHeader => {
                let Some(header) = entry::decode_header(input, self.offset, algo)? else {
                    self.phase = Phase::EntryHeader;
                    return Ok(None);
                };
                let raw = &input[..header.header_len];
                let mut crc = crc32fast::Hasher::new();
                crc.update(raw);
                let object = match header.kind {
                    EntryKind::Base(kind) => Some(Hasher::for_object(algo, kind.name(), header.size)),
                    _ => {
                        self.progress.total_deltas += 1;
                        None
                    }
                };
                let offset = self.offset;
                self.consume(raw);
                self.phase = Phase::Body(Box::new(Body {
                    offset,
                    header,
                    zlib: Decompress::new(true),
                    crc,
                    object,
                    inflated: 0,
                }));
                Ok(Some(header.header_len))
            }
            Phase::Body(mut body) => {
                let (in_before, out_before) = (body.zlib.total_in(), body.zlib.total_out());
                let status = body
                    .zlib
                    .decompress(input, &mut self.scratch, FlushDecompress::None)
                    .map_err(|e| PackError::corrupt(body.offset, format!("inflate failed: {e}")))?;
                let used = (body.zlib.total_in() - in_before) as usize;
                let produced = (body.zlib.total_out() - out_before) as usize;

                body.crc.update(&input[..used]);
                if let Some(hasher) = body.object.as_mut() {
                    hasher.update(&self.scratch[..produced]);
                }
                body.inflated += produced as u64;
                if body.inflated > body.header.size {
                    return Err(PackError::corrupt(body.offset, "entry inflates past its declared size"));
                }
                self.consume(&input[..used]);

                if status == Status::StreamEnd {
                    self.finish_entry(*body)?;
                    return Ok(Some(used));
                }
                let stalled = used == 0 && produced == 0;
                self.phase = Phase::Body(body);
                Ok(if stalled { None } else { Some(used) })
            }
            Phase::Trailer => {
                let len = algo.digest_len();
                if input.len() < len {
                    self.phase = Phase::Trailer;
                    return Ok(None);
                }
                let expected = ObjectId::from_bytes(&input[..len], algo)?;
                let hasher = std::mem::replace(&mut self.pack_hasher, Hasher::new(algo));
                let actual = hasher.finalize()?;
                if actual != expected {
                    return Err(PackError::ChecksumMismatch { expected, actual });
                }
                self.offset += len as u64;
                self.trailer = Some(expected);
                self.phase = Phase::Done;
                Ok(Some(len))
            }
            Phase::Done => {
                if input.is_empty() {
                    Ok(None)
                } else {
                    Err(PackError::BadHeader(format!(
                        "{} bytes after the pack trailer",
                        input.len()
                    )))
                }
            }
        }
    }

    fn finish_entry(&mut self, body: Body) -> Result<(), PackError> {
        if body.inflated != body.header.size {
            return Err(PackError::corrupt(
                body.offset,
                format!("inflated {} bytes, header says {}", body.inflated, body.header.size),
            ));
        }
        let oid = body.object.map(Hasher::finalize).transpose()?;
        self.slots.push(Slot {
            offset: body.offset,
            end: self.offset,
            header: body.header,
            crc32: body.crc.finalize(),
            oid,
        });
        self.progress.received_objects += 1;
        if oid.is_some() {
            self.progress.indexed_objects += 1;
        }
        notify(&mut self.on_progress, &self.progress)?;
        self.phase = if self.slots.len() as u64 == u64::from(self.progress.total_objects) {
            Phase::Trailer
        } else {
            Phase::EntryHeader
        };
        Ok(())
    }

    /// Resolve deltas, write the index and install both files.
    pub fn commit(&mut self) -> Result<IndexerProgress, PackError> {
        match self.state {
            IndexerState::Created | IndexerState::Appending => {}
            other => return Err(PackError::InvalidState(other)),
        }
        self.transition(IndexerState::Committing);
        match self.finish() {
            Ok(written) => {
                tracing::debug!(
                    pack = %written.pack_path.display(),
                    objects = self.slots.len(),
                    local = self.progress.local_objects,
                    "pack indexed"
                );
                self.written = Some(written);
                self.transition(IndexerState::Finalized);
                Ok(self.progress)
            }
            Err(e) => {
                self.fail();
                Err(e)
            }
        }
    }

    fn finish(&mut self) -> Result<WrittenPack, PackError> {
        let (Phase::Done, Some(trailer)) = (&self.phase, self.trailer) else {
            return Err(PackError::BadHeader(format!(
                "stream ended after {} of {} objects",
                self.progress.received_objects, self.progress.total_objects
            )));
        };
        let mut file = self
            .tmp
            .take()
            .ok_or(PackError::InvalidState(IndexerState::Committing))?;
        file.flush()?;
        // SAFETY: the spool file is private to this indexer and no longer
        // written while mapped.
        let map = unsafe { Mmap::map(&file)? };

        let externals = self.resolve_deltas(&map)?;
        if self.options.verify {
            self.verify_entries(&map, &trailer)?;
        }
        drop(map);

        let checksum = if self.options.keep_thin_bases && !externals.is_empty() {
            self.append_bases(&mut file, externals)?
        } else {
            trailer
        };
        file.sync_all()?;
        drop(file);

        let mut entries = Vec::with_capacity(self.slots.len());
        for slot in &self.slots {
            let oid = slot
                .oid
                .ok_or_else(|| PackError::corrupt(slot.offset, "entry was never resolved"))?;
            entries.push(IdxEntry {
                oid,
                offset: slot.offset,
                crc32: slot.crc32,
            });
        }
        let mut idx = Vec::new();
        write_idx(&mut entries, &checksum, &mut idx)?;

        let (pack_name, idx_name) = pack_file_names(&checksum);
        let pack_path = self.dir.join(pack_name);
        finalize_file(&self.tmp_path, &pack_path)?;
        let index_path = install_file(&self.dir, &idx_name, &idx)?;
        Ok(WrittenPack {
            pack_path,
            index_path,
            checksum,
        })
    }

    fn resolve_deltas(&mut self, pack: &[u8]) -> Result<Vec<(ObjectId, RawObject)>, PackError> {
        let mut by_offset = HashMap::new();
        let mut ofs_children: HashMap<u64, Vec<usize>> = HashMap::new();
        let mut ref_children: HashMap<ObjectId, Vec<usize>> = HashMap::new();
        for (i, slot) in self.slots.iter().enumerate() {
            by_offset.insert(slot.offset, i);
            match slot.header.kind {
                EntryKind::Base(_) => {}
                EntryKind::OfsDelta { base_offset } => ofs_children.entry(base_offset).or_default().push(i),
                EntryKind::RefDelta { base } => ref_children.entry(base).or_default().push(i),
            }
        }
        if let Some((&bad, children)) = ofs_children.iter().find(|(o, _)| !by_offset.contains_key(*o)) {
            let at = self.slots[children[0]].offset;
            return Err(PackError::corrupt(at, format!("delta base offset {bad} is not an entry")));
        }

        let mut walk = ChainWalk {
            pack,
            algo: self.options.hash_algorithm,
            slots: &mut self.slots,
            ofs_children,
            ref_children,
            progress: &mut self.progress,
            on_progress: &mut self.on_progress,
        };

        for i in 0..walk.slots.len() {
            let slot = &walk.slots[i];
            let (EntryKind::Base(kind), Some(oid)) = (slot.header.kind, slot.oid) else {
                continue;
            };
            let offset = slot.offset;
            if !walk.ofs_children.contains_key(&offset) && !walk.ref_children.contains_key(&oid) {
                continue;
            }
            let data = walk.inflate(i)?;
            walk.descend(kind, &data, Some(offset), &oid, 1)?;
        }

        let mut externals = Vec::new();
        let mut missing: Vec<ObjectId> = Vec::new();
        loop {
            let mut wanted: Vec<ObjectId> = walk
                .ref_children
                .keys()
                .filter(|k| !missing.contains(k))
                .copied()
                .collect();
            if wanted.is_empty() {
                break;
            }
            wanted.sort();
            let mut found_any = false;
            for oid in wanted {
                if !walk.ref_children.contains_key(&oid) {
                    continue;
                }
                match self.bases.find_base(&oid) {
                    Some(base) => {
                        tracing::debug!(%oid, kind = %base.kind, "thin pack base found locally");
                        walk.progress.local_objects += 1;
                        notify(walk.on_progress, walk.progress)?;
                        walk.descend(base.kind, &base.data, None, &oid, 1)?;
                        externals.push((oid, base));
                        found_any = true;
                    }
                    None => {
                        tracing::debug!(%oid, "thin pack base missing");
                        missing.push(oid);
                    }
                }
            }
            if !found_any {
                break;
            }
        }

        let unresolved = walk.progress.total_deltas - walk.progress.indexed_deltas;
        if unresolved > 0 {
            return Err(PackError::Unresolved {
                count: unresolved as usize,
                first: missing
                    .first()
                    .copied()
                    .unwrap_or(self.options.hash_algorithm.null_oid()),
            });
        }
        Ok(externals)
    }

    fn verify_entries(&self, pack: &[u8], trailer: &ObjectId) -> Result<(), PackError> {
        let algo = self.options.hash_algorithm;
        let body = &pack[..pack.len() - algo.digest_len()];
        let actual = Hasher::digest(algo, body)?;
        if actual != *trailer {
            return Err(PackError::ChecksumMismatch {
                expected: *trailer,
                actual,
            });
        }
        for slot in &self.slots {
            let raw = &pack[slot.offset as usize..slot.end as usize];
            if crc32fast::hash(raw) != slot.crc32 {
                return Err(PackError::corrupt(slot.offset, "CRC32 changed since it was received"));
            }
            if let (EntryKind::Base(kind), Some(expected)) = (slot.header.kind, slot.oid) {
                let (data, _) = entry::inflate_exact(&raw[slot.header.header_len..], slot.header.size as usize)
                    .map_err(|r| PackError::corrupt(slot.offset, r))?;
                let actual = Hasher::hash_object(algo, kind.name(), &data)?;
                if actual != expected {
                    return Err(PackError::ChecksumMismatch { expected, actual });
                }
            }
        }
        tracing::trace!(objects = self.slots.len(), "pack verified");
        Ok(())
    }

    /// Append thin bases as whole objects, rewrite the count and trailer.
    fn append_bases(
        &mut self,
        file: &mut File,
        externals: Vec<(ObjectId, RawObject)>,
    ) -> Result<ObjectId, PackError> {
        let algo = self.options.hash_algorithm;
        let mut offset = self.offset - algo.digest_len() as u64;
        file.set_len(offset)?;
        file.seek(SeekFrom::Start(offset))?;

        for (oid, base) in externals {
            let mut buf = Vec::new();
            let kind = EntryKind::Base(base.kind);
            entry::encode_header(&kind, base.data.len() as u64, offset, &mut buf);
            let header_len = buf.len();
            let mut enc = ZlibEncoder::new(&mut buf, Compression::default());
            enc.write_all(&base.data)?;
            enc.finish()?;
            file.write_all(&buf)?;

            self.slots.push(Slot {
                offset,
                end: offset + buf.len() as u64,
                header: EntryHeader {
                    kind,
                    size: base.data.len() as u64,
                    header_len,
                },
                crc32: crc32fast::hash(&buf),
                oid: Some(oid),
            });
            offset += buf.len() as u64;
        }

        let count = u32::try_from(self.slots.len())
            .map_err(|_| PackError::BadHeader("more than 2^32 entries".into()))?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&pack_header(count))?;

        file.seek(SeekFrom::Start(0))?;
        let mut hasher = Hasher::new(algo);
        io::copy(&mut Read::by_ref(file).take(offset), &mut hasher)?;
        let checksum = hasher.finalize()?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(checksum.as_bytes())?;
        tracing::debug!(count, "appended thin pack bases");
        Ok(checksum)
    }
}

impl Drop for Indexer<'_> {
    fn drop(&mut self) {
        if !matches!(self.state, IndexerState::Finalized | IndexerState::Failed | IndexerState::Created) {
            self.tmp.take();
            let _ = fs::remove_file(&self.tmp_path);
        }
    }
}

/// Depth-first delta resolution from a known base.
struct ChainWalk<'w, 'a> {
    pack: &'w [u8],
    algo: HashAlgorithm,
    slots: &'w mut Vec<Slot>,
    ofs_children: HashMap<u64, Vec<usize>>,
    ref_children: HashMap<ObjectId, Vec<usize>>,
    progress: &'w mut IndexerProgress,
    on_progress: &'w mut Option<ProgressFn<'a>>,
}

impl ChainWalk<'_, '_> {
    fn inflate(&self, i: usize) -> Result<Vec<u8>, PackError> {
        let slot = &self.slots[i];
        let start = slot.offset as usize + slot.header.header_len;
        entry::inflate_exact(&self.pack[start..slot.end as usize], slot.header.size as usize)
            .map(|(data, _)| data)
            .map_err(|r| PackError::corrupt(slot.offset, r))
    }

    fn descend(
        &mut self,
        kind: ObjectType,
        base: &[u8],
        offset: Option<u64>,
        oid: &ObjectId,
        depth: usize,
    ) -> Result<(), PackError> {
        let mut children = offset
            .and_then(|o| self.ofs_children.remove(&o))
            .unwrap_or_default();
        children.extend(self.ref_children.remove(oid).unwrap_or_default());

        for child in children {
            let child_offset = self.slots[child].offset;
            if depth > MAX_DELTA_CHAIN_DEPTH {
                return Err(PackError::ChainTooDeep {
                    offset: child_offset,
                    max: MAX_DELTA_CHAIN_DEPTH,
                });
            }
            let instructions = self.inflate(child)?;
            let content = delta::apply(base, &instructions)?;
            let child_oid = Hasher::hash_object(self.algo, kind.name(), &content)?;
            self.slots[child].oid = Some(child_oid);
            self.progress.indexed_deltas += 1;
            self.progress.indexed_objects += 1;
            notify(self.on_progress, self.progress)?;
            self.descend(kind, &content, Some(child_offset), &child_oid, depth + 1)?;
        }
        Ok(())
    }
}
