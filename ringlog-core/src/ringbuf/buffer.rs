//! Ring buffer handle: creation, loading, remapping and repair.

use super::alloc::Tx;
use super::header::{HeaderFields, SealState, num_entries};
use super::mapping::{Access, FileIdentity, Mapping};
use crate::config::{RingBufConfig, validate_num_words};
use crate::error::{Result, RingBufError};
use crate::lock::{LockGuard, LockMode};
use crate::paths::create_parent_dirs;
use crate::seqstore::SequenceStore;
use serde::Serialize;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

/// A loaded ring buffer.
///
/// The handle owns the mapping of the file at `path`. Rotation and
/// [`reload`](Self::reload) replace the mapping; transactions issued on the
/// previous one are then refused with `StaleTransaction`.
pub struct RingBuf {
    pub(super) path: PathBuf,
    pub(super) map: Option<Mapping>,
    pub(super) config: RingBufConfig,
    pub(super) access: Access,
}

/// Point-in-time view of a ring buffer, for operators.
#[derive(Debug, Clone, Serialize)]
pub struct RingBufSummary {
    /// Path of the mapped file.
    pub path: PathBuf,
    /// Whether the file is mapped read-only (archives).
    pub read_only: bool,
    /// Header values.
    #[serde(flatten)]
    pub header: HeaderFields,
    /// Sequence number the next allocation will receive.
    pub next_seq: u64,
    /// Committed, unconsumed words.
    pub words_used: u32,
    /// Words available to producers.
    pub words_free: u32,
    /// `words_used / num_words`.
    pub fill_ratio: f64,
    /// Whether every head matches its tail (no transaction in flight). The
    /// producer head of a sealed file stays one past the EOF mark.
    pub consistent: bool,
}

impl RingBuf {
    /// Create the buffer file at `path` unless it already exists.
    ///
    /// Losing the creation race to another process is not an error.
    pub fn create(path: impl AsRef<Path>, wrap: bool, num_words: u32) -> Result<()> {
        Self::create_with(
            path,
            &RingBufConfig::default()
                .with_wrap(wrap)
                .with_num_words(num_words),
        )
    }

    /// Create the buffer file at `path` with the creation parameters of `config`.
    ///
    /// Holds the exclusive lock so a creation never interleaves with a
    /// rotation of the same buffer.
    pub fn create_with(path: impl AsRef<Path>, config: &RingBufConfig) -> Result<()> {
        let path = path.as_ref();
        config.validate()?;
        // The lock file lives next to the buffer.
        create_parent_dirs(path).map_err(RingBufError::io(path, "create parent directories"))?;
        let lock = LockGuard::acquire(path, LockMode::Exclusive, false)?;
        Self::create_locked(path, config.wrap, config.num_words)?;
        lock.release()
    }

    /// Create the file with exclusive-create semantics; the caller holds the lock.
    ///
    /// Returns whether this call created the file.
    pub(crate) fn create_locked(path: &Path, wrap: bool, num_words: u32) -> Result<bool> {
        validate_num_words(num_words)?;
        create_parent_dirs(path).map_err(RingBufError::io(path, "create parent directories"))?;

        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = match options.open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                tracing::trace!(path = %path.display(), "Ring buffer already exists");
                return Ok(false);
            }
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "Cannot create ring buffer");
                return Err(RingBufError::io(path, "create")(e));
            }
        };

        match initialize(&mut file, path, wrap, num_words) {
            Ok(fields) => {
                tracing::info!(
                    path = %path.display(),
                    num_words,
                    wrap,
                    first_seq = fields.first_seq,
                    "Created ring buffer"
                );
                Ok(true)
            }
            Err(e) => {
                drop(file);
                if let Err(rm) = std::fs::remove_file(path) {
                    tracing::error!(
                        path = %path.display(),
                        error = %rm,
                        "Cannot erase half-created ring buffer"
                    );
                }
                Err(e)
            }
        }
    }

    /// Map an existing buffer with the default configuration.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::load_with(path, RingBufConfig::default())
    }

    /// Map an existing buffer read-write.
    ///
    /// The header is validated first; a corrupt file is never kept mapped.
    pub fn load_with(path: impl AsRef<Path>, config: RingBufConfig) -> Result<Self> {
        let mut rb = Self {
            path: path.as_ref().to_path_buf(),
            map: None,
            config,
            access: Access::ReadWrite,
        };
        rb.reload()?;
        Ok(rb)
    }

    /// Create the buffer if needed, then load it.
    pub fn open(path: impl AsRef<Path>, config: RingBufConfig) -> Result<Self> {
        Self::create_with(path.as_ref(), &config)?;
        Self::load_with(path, config)
    }

    /// Map an archived segment read-only, for inspection with
    /// [`read_first`](Self::read_first) / [`read_next`](Self::read_next).
    pub fn load_archive(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let map = Mapping::open(&path, Access::ReadOnly)?;
        Ok(Self {
            path,
            map: Some(map),
            config: RingBufConfig::default().with_shared_lock_on_load(false),
            access: Access::ReadOnly,
        })
    }

    /// Unmap the file. Safe to call more than once.
    pub fn unload(&mut self) {
        if self.map.take().is_some() {
            tracing::debug!(path = %self.path.display(), "Unloaded ring buffer");
        }
    }

    /// Map whatever file is now at the handle's path.
    ///
    /// Takes the shared lock (if configured and the lock file exists) so a
    /// rotation in progress is waited for.
    pub fn reload(&mut self) -> Result<()> {
        let lock = if self.config.shared_lock_on_load && self.access == Access::ReadWrite {
            Some(LockGuard::acquire(&self.path, LockMode::Shared, true)?)
        } else {
            None
        };
        self.remap()?;
        if let Some(lock) = lock {
            lock.release()?;
        }
        Ok(())
    }

    /// Replace the mapping; the caller handles locking.
    ///
    /// The old mapping is gone even if mapping the new file fails.
    pub(crate) fn remap(&mut self) -> Result<()> {
        self.map = None;
        self.map = Some(Mapping::open(&self.path, self.access)?);
        Ok(())
    }

    /// Map `file` in place of the current mapping while keeping the handle
    /// bound to its path. Used by consumers draining archived segments.
    pub(crate) fn remap_to(&mut self, file: &Path) -> Result<()> {
        self.map = None;
        self.map = Some(Mapping::open(file, self.access)?);
        Ok(())
    }

    /// Whether a file is currently mapped.
    pub fn is_loaded(&self) -> bool {
        self.map.is_some()
    }

    /// Path of the buffer.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Configuration in use.
    pub fn config(&self) -> &RingBufConfig {
        &self.config
    }

    /// Whether the mapping is read-only.
    pub fn is_read_only(&self) -> bool {
        self.access == Access::ReadOnly
    }

    /// Copy of the current header values.
    pub fn header(&self) -> Result<HeaderFields> {
        Ok(self.mapping()?.header().snapshot())
    }

    /// Occupancy and header overview.
    pub fn summary(&self) -> Result<RingBufSummary> {
        let map = self.mapping()?;
        let header = map.header().snapshot();
        let words_used = num_entries(header.num_words, header.prod_tail, header.cons_tail);
        Ok(RingBufSummary {
            path: self.path.clone(),
            read_only: !map.is_writable(),
            next_seq: header.next_seq(),
            words_used,
            words_free: header.num_words - words_used,
            fill_ratio: words_used as f64 / header.num_words as f64,
            consistent: (header.prod_head == header.prod_tail || header.seal == SealState::Sealed)
                && header.cons_head == header.cons_tail,
            header,
        })
    }

    /// Whether the file at the handle's path is no longer the mapped one,
    /// i.e. another process rotated it away.
    pub fn is_rotated_away(&self) -> Result<bool> {
        let map = self.mapping()?;
        match std::fs::metadata(&self.path) {
            Ok(metadata) => Ok(FileIdentity::of(&metadata) != map.identity()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(true),
            Err(e) => Err(RingBufError::io(&self.path, "stat")(e)),
        }
    }

    /// Discard uncommitted reservations left by a crashed producer or consumer.
    ///
    /// Resets each head to its tail, and reopens a file whose rotator died
    /// before sealing it. Returns whether anything changed; a second call on
    /// the same state returns false. The caller must make sure nobody else is
    /// using the buffer.
    pub fn repair(&mut self) -> Result<bool> {
        let map = self.writable_mapping()?;
        let hdr = map.header();
        let mut changed = false;

        // Avoid dirtying the page when there is nothing to do.
        let prod_tail = hdr.prod_tail.load(Ordering::Acquire);
        let prod_head = hdr.prod_head.load(Ordering::Acquire);
        // A sealed file keeps its head on the word after the EOF mark.
        let sealed_head = (prod_tail + 1) % map.num_words();
        let cleanly_sealed = hdr.seal_state() == SealState::Sealed && prod_head == sealed_head;
        if prod_head != prod_tail && !cleanly_sealed {
            hdr.prod_head.store(prod_tail, Ordering::Release);
            tracing::warn!(path = %self.path.display(), prod_head, prod_tail, "Reset producer head");
            changed = true;
        }

        let cons_tail = hdr.cons_tail.load(Ordering::Acquire);
        let cons_head = hdr.cons_head.load(Ordering::Acquire);
        if cons_head != cons_tail {
            hdr.cons_head.store(cons_tail, Ordering::Release);
            tracing::warn!(path = %self.path.display(), cons_head, cons_tail, "Reset consumer head");
            changed = true;
        }

        if hdr.seal_state() == SealState::Sealing {
            hdr.set_seal_state(SealState::Live);
            tracing::warn!(path = %self.path.display(), "Reopened half-sealed buffer");
            changed = true;
        }

        Ok(changed)
    }

    pub(super) fn mapping(&self) -> Result<&Mapping> {
        self.map.as_ref().ok_or_else(|| RingBufError::Unloaded {
            path: self.path.clone(),
        })
    }

    pub(super) fn writable_mapping(&self) -> Result<&Mapping> {
        let map = self.mapping()?;
        if !map.is_writable() {
            return Err(RingBufError::ReadOnly {
                path: self.path.clone(),
            });
        }
        Ok(map)
    }

    /// The mapping `tx` was issued on, if it is still the current one.
    pub(super) fn mapping_for(&self, tx: &Tx) -> Result<&Mapping> {
        let map = self.mapping()?;
        if map.id() != tx.mapping() {
            return Err(RingBufError::StaleTransaction {
                tx_mapping: tx.mapping(),
                mapping: map.id(),
            });
        }
        Ok(map)
    }
}

impl fmt::Debug for RingBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingBuf")
            .field("path", &self.path)
            .field("mapping", &self.map.as_ref().map(Mapping::id))
            .field("access", &self.access)
            .finish()
    }
}

/// Size the new file and write its header.
fn initialize(file: &mut File, path: &Path, wrap: bool, num_words: u32) -> Result<HeaderFields> {
    let first_seq = SequenceStore::for_buffer(path).read()?;
    let fields = HeaderFields::new(num_words, first_seq, wrap);

    file.set_len(fields.file_len())
        .map_err(RingBufError::io(path, "truncate"))?;
    let bytes = fields
        .to_bytes()
        .map_err(RingBufError::io(path, "encode header"))?;
    file.write_all(&bytes)
        .map_err(RingBufError::io(path, "write header"))?;
    file.sync_all().map_err(RingBufError::io(path, "sync"))?;

    Ok(fields)
}

/// Load the buffer at `path`, repair it and reconcile its sequence store.
///
/// Returns whether the cursors needed repair.
pub fn repair_path(path: impl AsRef<Path>) -> Result<bool> {
    let path = path.as_ref();
    let mut rb = RingBuf::load(path)?;
    let changed = rb.repair()?;
    rb.mapping()?.flush()?;
    rb.unload();
    SequenceStore::for_buffer(path).recover()?;
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_then_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sub/dir/out.r");

        RingBuf::create(&path, true, 64).unwrap();
        let rb = RingBuf::load(&path).unwrap();
        let header = rb.header().unwrap();
        assert_eq!(header.num_words, 64);
        assert!(header.wrap);
        assert_eq!(header.first_seq, 0);
        assert_eq!(header.num_allocs, 0);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 64 + 64 * 4);
    }

    #[test]
    fn create_is_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.r");

        RingBuf::create(&path, false, 64).unwrap();
        // Different parameters: the existing file wins.
        RingBuf::create(&path, true, 128).unwrap();

        let rb = RingBuf::load(&path).unwrap();
        assert_eq!(rb.header().unwrap().num_words, 64);
        assert!(!rb.header().unwrap().wrap);
    }

    #[test]
    fn create_seeds_first_seq_from_store() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.r");
        SequenceStore::for_buffer(&path).write(1234).unwrap();

        RingBuf::create(&path, false, 64).unwrap();
        assert_eq!(RingBuf::load(&path).unwrap().header().unwrap().first_seq, 1234);
    }

    #[test]
    fn create_rejects_bad_capacity() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.r");
        assert!(matches!(
            RingBuf::create(&path, true, 2),
            Err(RingBufError::InvalidConfig { .. })
        ));
        assert!(!path.exists());
    }

    #[test]
    fn unload_is_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.r");
        let mut rb = RingBuf::open(&path, RingBufConfig::default().with_num_words(32)).unwrap();

        assert!(rb.is_loaded());
        rb.unload();
        rb.unload();
        assert!(!rb.is_loaded());
        assert!(matches!(rb.header(), Err(RingBufError::Unloaded { .. })));
    }

    #[test]
    fn load_rejects_truncated_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.r");
        RingBuf::create(&path, true, 64).unwrap();

        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(64 + 10 * 4).unwrap();

        assert!(matches!(
            RingBuf::load(&path),
            Err(RingBufError::Corrupt { .. })
        ));
    }

    #[test]
    fn repair_resets_heads_once() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.r");
        let mut rb = RingBuf::open(&path, RingBufConfig::default().with_num_words(64)).unwrap();

        // A producer reserved space and died before committing.
        let tx = rb.enqueue_alloc(5).unwrap();
        assert_eq!(rb.header().unwrap().prod_head, tx.next());
        assert!(!rb.summary().unwrap().consistent);

        assert!(rb.repair().unwrap());
        let header = rb.header().unwrap();
        assert_eq!(header.prod_head, header.prod_tail);
        assert!(!rb.repair().unwrap());
        assert!(rb.summary().unwrap().consistent);
    }

    #[test]
    fn open_creates_missing_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a/b/out.r");

        let rb = RingBuf::open(&path, RingBufConfig::archival(32)).unwrap();
        assert!(rb.is_loaded());
        assert!(crate::paths::lock_path(&path).is_file());
    }

    #[test]
    fn repair_leaves_sealed_archive_alone() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.r");
        let mut rb = RingBuf::open(&path, RingBufConfig::archival(32)).unwrap();
        rb.enqueue(&[1, 2], 0.0, 0.0).unwrap();
        assert!(rb.rotate().unwrap());

        let (_, archive) = crate::archive::list_archives(&path).unwrap().remove(0);
        let before = std::fs::read(&archive).unwrap();

        let mut archived = RingBuf::load(&archive).unwrap();
        assert_eq!(archived.header().unwrap().seal, SealState::Sealed);
        assert!(archived.summary().unwrap().consistent);
        assert!(!archived.repair().unwrap());
        archived.unload();

        assert_eq!(std::fs::read(&archive).unwrap(), before);
    }

    #[test]
    fn rotation_is_detected_by_identity() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.r");
        let rb = RingBuf::open(&path, RingBufConfig::default().with_num_words(32)).unwrap();
        assert!(!rb.is_rotated_away().unwrap());

        std::fs::rename(&path, dir.path().join("elsewhere")).unwrap();
        assert!(rb.is_rotated_away().unwrap());

        RingBuf::create(&path, true, 32).unwrap();
        assert!(rb.is_rotated_away().unwrap());
    }

    #[test]
    fn summary_reports_occupancy() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.r");
        let mut rb = RingBuf::open(&path, RingBufConfig::default().with_num_words(100)).unwrap();
        rb.enqueue(&[1, 2, 3, 4], 0.0, 0.0).unwrap();

        let summary = rb.summary().unwrap();
        assert_eq!(summary.words_used, 5);
        assert_eq!(summary.words_free, 95);
        assert_eq!(summary.next_seq, 1);
        assert!((summary.fill_ratio - 0.05).abs() < 1e-9);

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["num_words"], 100);
        assert_eq!(json["prod_tail"], 5);
    }
}
