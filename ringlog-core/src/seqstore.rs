//! Sequence store.
//!
//! `<name>.arc/max` holds a single native-endian `u64`: the sequence number
//! following the last record of the most recent archive. A newly created
//! buffer starts its `first_seq` there, which keeps sequence numbers
//! monotonic across rotations.

use crate::archive::list_archives;
use crate::error::{Result, RingBufError};
use crate::paths::{archive_dir, create_private_dir_all, max_seq_path};
use byteorder::{NativeEndian, ReadBytesExt, WriteBytesExt};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

/// Size of the stored value.
const SEQ_SIZE: usize = std::mem::size_of::<u64>();

/// Handle on the sequence store of one ring buffer.
#[derive(Debug, Clone)]
pub struct SequenceStore {
    rb_path: PathBuf,
    path: PathBuf,
}

impl SequenceStore {
    /// The sequence store belonging to the buffer at `rb_path`.
    pub fn for_buffer(rb_path: &Path) -> Self {
        Self {
            rb_path: rb_path.to_path_buf(),
            path: max_seq_path(rb_path),
        }
    }

    /// Path of the `max` file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the recorded maximum; 0 when nothing was ever archived.
    pub fn read(&self) -> Result<u64> {
        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(RingBufError::io(&self.path, "open")(e)),
        };

        // read_to_end retries on EINTR and stops at EOF.
        let mut bytes = Vec::with_capacity(SEQ_SIZE);
        file.read_to_end(&mut bytes)
            .map_err(RingBufError::io(&self.path, "read"))?;

        match bytes.len() {
            0 => Ok(0),
            n if n < SEQ_SIZE => Err(RingBufError::corrupt(
                &self.path,
                format!("too short for a sequence number ({} bytes)", n),
            )),
            _ => (&bytes[..SEQ_SIZE])
                .read_u64::<NativeEndian>()
                .map_err(RingBufError::io(&self.path, "decode")),
        }
    }

    /// Persist `seq` as the new maximum.
    ///
    /// The value is written to a temporary file, synced and renamed over
    /// `max`, so a crash leaves either the old or the new value.
    pub fn write(&self, seq: u64) -> Result<()> {
        let dir = archive_dir(&self.rb_path);
        create_private_dir_all(&dir).map_err(RingBufError::io(&dir, "create directory"))?;

        let tmp = self.path.with_extension("tmp");
        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&tmp).map_err(RingBufError::io(&tmp, "create"))?;

        let mut buf = Vec::with_capacity(SEQ_SIZE);
        buf.write_u64::<NativeEndian>(seq)
            .map_err(RingBufError::io(&tmp, "encode"))?;
        // write_all retries on EINTR and fails on a short write.
        file.write_all(&buf).map_err(RingBufError::io(&tmp, "write"))?;
        file.sync_all().map_err(RingBufError::io(&tmp, "sync"))?;
        drop(file);

        std::fs::rename(&tmp, &self.path).map_err(RingBufError::io(&self.path, "rename"))?;
        tracing::debug!(path = %self.path.display(), seq, "Sequence store updated");
        Ok(())
    }

    /// Reconcile the store with the archive directory.
    ///
    /// If a rotation crashed after renaming the buffer but the store lags
    /// behind the archives (or is gone), the highest archived `last_seq` is
    /// written back. Returns the reconciled value. This is best effort: a
    /// crash between writing the store and renaming leaves the store ahead
    /// of the archives, which only skips sequence numbers.
    pub fn recover(&self) -> Result<u64> {
        let stored = self.read()?;
        let archived = list_archives(&self.rb_path)?
            .iter()
            .map(|(name, _)| name.last_seq)
            .max()
            .unwrap_or(0);

        if archived > stored {
            tracing::warn!(
                path = %self.path.display(),
                stored,
                archived,
                "Sequence store lags behind archives, rewriting it"
            );
            self.write(archived)?;
            return Ok(archived);
        }
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ArchiveName;
    use tempfile::tempdir;

    #[test]
    fn missing_store_reads_zero() {
        let dir = tempdir().unwrap();
        let store = SequenceStore::for_buffer(&dir.path().join("out.r"));
        assert_eq!(store.read().unwrap(), 0);
    }

    #[test]
    fn write_creates_archive_dir() {
        let dir = tempdir().unwrap();
        let rb = dir.path().join("out.r");
        let store = SequenceStore::for_buffer(&rb);

        store.write(42).unwrap();
        assert!(archive_dir(&rb).is_dir());
        assert_eq!(store.read().unwrap(), 42);

        store.write(43).unwrap();
        assert_eq!(store.read().unwrap(), 43);
        assert!(!store.path().with_extension("tmp").exists());
    }

    #[test]
    fn empty_store_reads_zero_and_short_store_is_corrupt() {
        let dir = tempdir().unwrap();
        let rb = dir.path().join("out.r");
        let store = SequenceStore::for_buffer(&rb);
        std::fs::create_dir_all(archive_dir(&rb)).unwrap();

        std::fs::write(store.path(), b"").unwrap();
        assert_eq!(store.read().unwrap(), 0);

        std::fs::write(store.path(), [1u8, 2, 3]).unwrap();
        assert!(matches!(store.read(), Err(RingBufError::Corrupt { .. })));
    }

    #[test]
    fn recover_catches_up_with_archives() {
        let dir = tempdir().unwrap();
        let rb = dir.path().join("out.r");
        let store = SequenceStore::for_buffer(&rb);
        store.write(8).unwrap();

        let name = ArchiveName {
            first_seq: 8,
            last_seq: 17,
            tmin: 0.0,
            tmax: 0.0,
        };
        std::fs::write(archive_dir(&rb).join(name.file_name()), b"").unwrap();

        assert_eq!(store.recover().unwrap(), 17);
        assert_eq!(store.read().unwrap(), 17);

        // Ahead of the archives: left alone.
        store.write(30).unwrap();
        assert_eq!(store.recover().unwrap(), 30);
    }
}
