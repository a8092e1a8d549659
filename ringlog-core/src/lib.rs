//! Ringlog Core Library
//!
//! A crash-resilient, file-backed ring buffer that several processes map at
//! once, with optional rotation of full buffers into an archive directory.
//!
//! # Key Components
//!
//! - **RingBuf**: the mapped buffer with lock-free two-phase enqueue/dequeue
//! - **Lock**: advisory file lock coordinating creation and rotation
//! - **SequenceStore**: persisted sequence counter keeping numbering monotonic
//! - **Archive**: naming and listing of rotated segments
//!
//! # Example
//!
//! ```ignore
//! use ringlog_core::prelude::*;
//!
//! let mut rb = RingBuf::open("/var/lib/app/events.r", RingBufConfig::archival(1 << 16))?;
//!
//! let tx = rb.enqueue_alloc(2)?;
//! rb.write_payload(&tx, 0, &[42, 43])?;
//! rb.enqueue_commit(&tx, 0.0, 0.0)?;
//!
//! while let Some(words) = rb.dequeue()? {
//!     println!("{:?}", words);
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod archive;
pub mod config;
pub mod error;
pub mod lock;
pub mod paths;
pub mod prelude;
pub mod ringbuf;
pub mod seqstore;

// Re-export key types at crate root for convenience
pub use archive::{ArchiveName, list_archives};
pub use config::RingBufConfig;
pub use error::{ErrorKind, Result, RingBufError};
pub use lock::{LockGuard, LockMode};
pub use ringbuf::{HeaderFields, RingBuf, RingBufSummary, Tx, repair_path};
pub use seqstore::SequenceStore;
