//! Error types for ring buffer operations.
//!
//! Errors carry the path of the file they concern so a failure can be traced
//! back to the buffer, lock file or archive that caused it. The taxonomy
//! collapses to two classes (see [`ErrorKind`]): `NoRoom` is backpressure and
//! everything else is a failure of the current operation.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// The main error type for ring buffer operations.
#[derive(Error, Debug)]
pub enum RingBufError {
    // =========================================================================
    // Backpressure (E001-E099)
    // =========================================================================
    /// Not enough free words for the requested record.
    #[error("E001: No room in ring buffer: need {needed} free words, {free} available")]
    NoRoom {
        /// Minimum number of free words the allocation required.
        needed: u32,
        /// Number of free words observed.
        free: u32,
    },

    /// The record can never fit, whatever the buffer occupancy.
    #[error("E002: Record of {requested} words cannot fit a buffer of {capacity} words")]
    RecordTooLarge {
        /// Number of payload words requested.
        requested: u32,
        /// Capacity of the data area in words.
        capacity: u32,
    },

    // =========================================================================
    // File Errors (E100-E199)
    // =========================================================================
    /// A system call on one of the buffer's files failed.
    #[error("E101: Cannot {op} '{path}': {source}")]
    Io {
        /// The file the operation was applied to.
        path: PathBuf,
        /// Short name of the failed operation.
        op: &'static str,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Structural validation failed; the file must not be mapped.
    #[error("E102: Invalid ring buffer file '{path}': {cause}")]
    Corrupt {
        /// The offending file.
        path: PathBuf,
        /// What was found to be wrong.
        cause: String,
    },

    /// The advisory lock could not be created or taken.
    #[error("E103: Cannot lock '{path}': {cause}")]
    Lock {
        /// The lock file.
        path: PathBuf,
        /// Reason for the failure.
        cause: String,
    },

    /// A file in the archive directory does not follow the archive naming scheme.
    #[error("E104: Invalid archive file name '{name}'")]
    InvalidArchiveName {
        /// The rejected file name.
        name: String,
    },

    /// The handle has been unloaded.
    #[error("E105: Ring buffer '{path}' is not loaded")]
    Unloaded {
        /// Path of the unloaded buffer.
        path: PathBuf,
    },

    /// A mutating operation was attempted through a read-only mapping.
    #[error("E106: Ring buffer '{path}' is mapped read-only")]
    ReadOnly {
        /// Path of the read-only buffer.
        path: PathBuf,
    },

    /// Invalid creation parameters.
    #[error("E107: Invalid ring buffer configuration: {cause}")]
    InvalidConfig {
        /// Description of the problem.
        cause: String,
    },

    // =========================================================================
    // Transaction Errors (E200-E299)
    // =========================================================================
    /// A transaction was used after the mapping it was issued on was replaced.
    #[error("E201: Transaction issued on mapping {tx_mapping} used on mapping {mapping}")]
    StaleTransaction {
        /// Mapping the transaction was issued on.
        tx_mapping: u64,
        /// Mapping currently held by the handle.
        mapping: u64,
    },

    /// Payload access outside the transaction's record.
    #[error("E202: Payload range {offset}+{len} out of bounds for a record of {size} words")]
    PayloadBounds {
        /// First word accessed, relative to the record start.
        offset: u32,
        /// Number of words accessed.
        len: u32,
        /// Size of the record in words.
        size: u32,
    },

    /// A tail advance waited too long for a predecessor's commit.
    #[error(
        "E203: Commit stalled after {waited:?}: tail is at {tail}, waiting for {seen}; \
         a peer may have crashed mid-write and the buffer needs repair"
    )]
    CommitStalled {
        /// Position the tail must reach before this commit may proceed.
        seen: u32,
        /// Tail position last observed.
        tail: u32,
        /// How long the commit waited.
        waited: Duration,
    },

    // =========================================================================
    // Rotation Errors (E300-E399)
    // =========================================================================
    /// Rotation was requested on a buffer that overwrites instead.
    #[error("E301: Ring buffer '{path}' wraps around and is never rotated")]
    NotRotatable {
        /// Path of the wrapping buffer.
        path: PathBuf,
    },

    /// Rotation renamed the live file away and could neither create a
    /// successor nor put the full buffer back.
    #[error(
        "E302: DEGRADED: '{path}' was archived as '{archive}' but no live buffer \
         could be restored: {cause}"
    )]
    Degraded {
        /// The live path that is now missing.
        path: PathBuf,
        /// Where the full buffer now lives.
        archive: PathBuf,
        /// Why recovery failed.
        cause: String,
    },
}

/// Coarse classification of [`RingBufError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Transient backpressure; retry later.
    NoRoom,
    /// The operation failed and must not be retried blindly.
    Failure,
}

impl RingBufError {
    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoRoom { .. } => ErrorKind::NoRoom,
            _ => ErrorKind::Failure,
        }
    }

    /// Whether this is the backpressure signal.
    pub fn is_no_room(&self) -> bool {
        self.kind() == ErrorKind::NoRoom
    }

    /// Build a mapper from `std::io::Error` for the given file and operation.
    pub(crate) fn io(
        path: impl Into<PathBuf>,
        op: &'static str,
    ) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io { path, op, source }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, cause: impl Into<String>) -> Self {
        Self::Corrupt {
            path: path.into(),
            cause: cause.into(),
        }
    }
}

/// Result type alias for ring buffer operations.
pub type Result<T> = std::result::Result<T, RingBufError>;
