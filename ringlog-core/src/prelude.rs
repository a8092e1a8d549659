//! Prelude for convenient imports.
//!
//! # Example
//!
//! ```ignore
//! use ringlog_core::prelude::*;
//! ```

// Error handling
pub use crate::error::{ErrorKind, Result, RingBufError};

// Buffer
pub use crate::config::RingBufConfig;
pub use crate::ringbuf::{HeaderFields, RingBuf, RingBufSummary, Tx, repair_path};

// Coordination and archives
pub use crate::archive::{ArchiveName, list_archives};
pub use crate::lock::{LockGuard, LockMode};
pub use crate::seqstore::SequenceStore;
