//! File-backed ring buffer shared between processes.
//!
//! Every process maps the same file and coordinates through atomic cursors
//! in its header. Producers and consumers each have a head (reservations)
//! and a tail (commits); see the `alloc` module.
//!
//! # Layout
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │ Header (64 bytes, native endian)                                 │
//! │   num_words, prod_head, prod_tail, cons_head, cons_tail, seal    │
//! │   num_allocs, first_seq, wrap + pad, tmin, tmax                  │
//! ├──────────────────────────────────────────────────────────────────┤
//! │ Data Region (num_words u32 words)                                │
//! │ ┌──────────────────────────────────────────────────────────────┐ │
//! │ │ Record: [len: u32][payload: len words]                       │ │
//! │ ├──────────────────────────────────────────────────────────────┤ │
//! │ │ Record: [len: u32][payload: len words]                       │ │
//! │ ├──────────────────────────────────────────────────────────────┤ │
//! │ │ [EOF_MARK] unused tail, continue at word 0                   │ │
//! │ └──────────────────────────────────────────────────────────────┘ │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Rotation
//!
//! A non-wrapping buffer is never overwritten: when it fills up it is
//! sealed, renamed into `<name>.arc/` and replaced by an empty file whose
//! `first_seq` continues the sequence. The word at offset 20 of the header
//! tracks the seal ([`SealState`]). See the `rotation` module.

mod alloc;
mod buffer;
mod header;
mod mapping;
mod rotation;

pub use alloc::{Records, Tx, bytes_from_words, words_from_bytes};
pub use buffer::{RingBuf, RingBufSummary, repair_path};
pub use header::{
    EOF_MARK, HEADER_SIZE, HeaderFields, SealState, WORD_SIZE, num_entries, num_free,
};
pub use mapping::Access;
