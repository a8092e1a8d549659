//! Memory mapping of a ring buffer file.
//!
//! A [`Mapping`] owns the mmap and hands out the header and the data words
//! only as atomics, tied to its own lifetime. Dropping it unmaps the file;
//! replacing it (after a rotation) issues a new mapping id so transactions
//! from the old one are refused.

use super::header::{EOF_MARK, HEADER_SIZE, HeaderFields, RawHeader};
use crate::error::{Result, RingBufError};
use memmap2::{Mmap, MmapMut, MmapOptions};
use std::fs::{Metadata, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

static NEXT_MAPPING_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a file on disk, to notice it was renamed away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FileIdentity {
    dev: u64,
    ino: u64,
}

impl FileIdentity {
    #[cfg(unix)]
    pub fn of(metadata: &Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;
        Self {
            dev: metadata.dev(),
            ino: metadata.ino(),
        }
    }

    #[cfg(not(unix))]
    pub fn of(metadata: &Metadata) -> Self {
        let _ = metadata;
        Self { dev: 0, ino: 0 }
    }
}

/// How the file is mapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Producers and consumers.
    ReadWrite,
    /// Inspection of archives, which must never be written again.
    ReadOnly,
}

enum Region {
    ReadWrite(MmapMut),
    ReadOnly(Mmap),
}

pub(crate) struct Mapping {
    region: Region,
    /// Base of the region, taken once so that shared accessors carry write
    /// provenance for the atomics.
    base: *mut u8,
    len: usize,
    num_words: u32,
    identity: FileIdentity,
    id: u64,
    path: PathBuf,
}

// The region is only reached through atomics.
unsafe impl Send for Mapping {}
unsafe impl Sync for Mapping {}

impl Mapping {
    /// Map an existing buffer file after validating its header.
    ///
    /// Nothing is kept mapped if validation fails.
    pub fn open(path: &Path, access: Access) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(access == Access::ReadWrite)
            .open(path)
            .map_err(|e| {
                tracing::error!(path = %path.display(), error = %e, "Cannot open ring buffer");
                RingBufError::io(path, "open")(e)
            })?;

        let metadata = file.metadata().map_err(RingBufError::io(path, "stat"))?;
        let file_len = metadata.len();
        if file_len <= HEADER_SIZE as u64 {
            return Err(RingBufError::corrupt(path, "too small"));
        }
        let len = usize::try_from(file_len)
            .map_err(|_| RingBufError::corrupt(path, "too large to map"))?;

        let mut region = match access {
            Access::ReadWrite => {
                let mmap = unsafe { MmapOptions::new().len(len).map_mut(&file) }
                    .map_err(RingBufError::io(path, "mmap"))?;
                Region::ReadWrite(mmap)
            }
            Access::ReadOnly => {
                let mmap = unsafe { MmapOptions::new().len(len).map(&file) }
                    .map_err(RingBufError::io(path, "mmap"))?;
                Region::ReadOnly(mmap)
            }
        };

        let bytes: &[u8] = match &region {
            Region::ReadWrite(m) => m,
            Region::ReadOnly(m) => m,
        };
        let fields = HeaderFields::from_bytes(&bytes[..HEADER_SIZE])
            .map_err(|e| RingBufError::corrupt(path, e.to_string()))?;
        if let Err(cause) = fields.validate(file_len) {
            tracing::error!(path = %path.display(), %cause, "Invalid ring buffer file");
            return Err(RingBufError::corrupt(path, cause));
        }

        let base = match &mut region {
            Region::ReadWrite(m) => m.as_mut_ptr(),
            Region::ReadOnly(m) => m.as_ptr().cast_mut(),
        };

        let id = NEXT_MAPPING_ID.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(path = %path.display(), mapping = id, num_words = fields.num_words, "Mapped ring buffer");

        Ok(Self {
            region,
            base,
            len,
            num_words: fields.num_words,
            identity: FileIdentity::of(&metadata),
            id,
            path: path.to_path_buf(),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn identity(&self) -> FileIdentity {
        self.identity
    }

    pub fn is_writable(&self) -> bool {
        matches!(self.region, Region::ReadWrite(_))
    }

    pub fn num_words(&self) -> u32 {
        self.num_words
    }

    pub fn header(&self) -> &RawHeader {
        // The region is page aligned, at least HEADER_SIZE long (checked in
        // open) and RawHeader is plain integers and atomics.
        unsafe { &*(self.base as *const RawHeader) }
    }

    pub fn data(&self) -> &[AtomicU32] {
        // HEADER_SIZE keeps the data 4-byte aligned; the length was checked
        // against num_words in open.
        unsafe {
            std::slice::from_raw_parts(
                self.base.add(HEADER_SIZE) as *const AtomicU32,
                self.num_words as usize,
            )
        }
    }

    /// Whether the word at `pos` is the EOF mark.
    pub fn is_eof_at(&self, pos: u32) -> bool {
        self.data()[pos as usize].load(Ordering::Acquire) == EOF_MARK
    }

    /// Flush dirty pages to the file.
    pub fn flush(&self) -> Result<()> {
        match &self.region {
            Region::ReadWrite(m) => m
                .flush()
                .map_err(RingBufError::io(&self.path, "msync")),
            Region::ReadOnly(_) => Ok(()),
        }
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        tracing::debug!(path = %self.path.display(), mapping = self.id, len = self.len, "Unmapping ring buffer");
    }
}
