//! Ring buffer header.

use crate::config::{MAX_NUM_WORDS, MIN_NUM_WORDS};
use byteorder::{NativeEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Fixed size of the header in bytes.
pub const HEADER_SIZE: usize = 64;

/// Size of a data word in bytes.
pub const WORD_SIZE: usize = std::mem::size_of::<u32>();

/// Length value marking "no record here, continue at offset 0".
pub const EOF_MARK: u32 = u32::MAX;

/// Rotation progress of a buffer file, stored in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SealState {
    /// Producers may allocate.
    Live = 0,
    /// A rotator is draining the producers; no new allocations.
    Sealing = 1,
    /// Producers are drained and the EOF mark is written. Nothing is
    /// allocated in this file again.
    Sealed = 2,
}

impl SealState {
    fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Live),
            1 => Some(Self::Sealing),
            2 => Some(Self::Sealed),
            _ => None,
        }
    }
}

/// The header as laid out in the mapped file.
///
/// Cursors and counters are atomics so that every process mapping the file
/// can advance them. `num_words`, `first_seq` and `wrap` are written once at
/// creation and only read afterwards.
#[repr(C)]
pub(crate) struct RawHeader {
    pub num_words: u32,
    pub prod_head: AtomicU32,
    pub prod_tail: AtomicU32,
    pub cons_head: AtomicU32,
    pub cons_tail: AtomicU32,
    seal: AtomicU32,
    pub num_allocs: AtomicU64,
    pub first_seq: u64,
    wrap: u8,
    _pad1: [u8; 7],
    /// `f64` bits.
    tmin: AtomicU64,
    /// `f64` bits.
    tmax: AtomicU64,
}

const _: () = assert!(std::mem::size_of::<RawHeader>() == HEADER_SIZE);

impl RawHeader {
    pub fn wrap(&self) -> bool {
        self.wrap != 0
    }

    /// Rotation progress; unknown values (rejected at load) read as sealed.
    pub fn seal_state(&self) -> SealState {
        SealState::from_u32(self.seal.load(Ordering::Acquire)).unwrap_or(SealState::Sealed)
    }

    pub fn set_seal_state(&self, state: SealState) {
        self.seal.store(state as u32, Ordering::Release);
    }

    pub fn tmin(&self) -> f64 {
        f64::from_bits(self.tmin.load(Ordering::Acquire))
    }

    pub fn tmax(&self) -> f64 {
        f64::from_bits(self.tmax.load(Ordering::Acquire))
    }

    /// Widen the time range to cover `[t_start, t_stop]`.
    ///
    /// Zero means "unset": a `(0, 0)` range is ignored and an unset bound is
    /// replaced outright. Callers are serialized by the tail advance.
    pub fn widen_times(&self, t_start: f64, t_stop: f64) {
        if t_start == 0.0 && t_stop == 0.0 {
            return;
        }
        let tmin = self.tmin();
        if tmin == 0.0 || t_start < tmin {
            self.tmin.store(t_start.to_bits(), Ordering::Release);
        }
        let tmax = self.tmax();
        if tmax == 0.0 || t_stop > tmax {
            self.tmax.store(t_stop.to_bits(), Ordering::Release);
        }
    }

    /// Copy the current values out.
    pub fn snapshot(&self) -> HeaderFields {
        HeaderFields {
            num_words: self.num_words,
            prod_head: self.prod_head.load(Ordering::Acquire),
            prod_tail: self.prod_tail.load(Ordering::Acquire),
            cons_head: self.cons_head.load(Ordering::Acquire),
            cons_tail: self.cons_tail.load(Ordering::Acquire),
            seal: self.seal_state(),
            num_allocs: self.num_allocs.load(Ordering::Acquire),
            first_seq: self.first_seq,
            wrap: self.wrap(),
            tmin: self.tmin(),
            tmax: self.tmax(),
        }
    }
}

/// Plain copy of the header fields.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct HeaderFields {
    /// Capacity of the data area, in words.
    pub num_words: u32,
    /// Producer reservation cursor.
    pub prod_head: u32,
    /// Producer commit cursor.
    pub prod_tail: u32,
    /// Consumer reservation cursor.
    pub cons_head: u32,
    /// Consumer commit cursor.
    pub cons_tail: u32,
    /// Rotation progress.
    pub seal: SealState,
    /// Records allocated since creation.
    pub num_allocs: u64,
    /// Sequence number of the first record of this file.
    pub first_seq: u64,
    /// Whether the buffer wraps instead of rotating.
    pub wrap: bool,
    /// Smallest record start time (0 if none).
    pub tmin: f64,
    /// Largest record stop time (0 if none).
    pub tmax: f64,
}

impl HeaderFields {
    /// Header of a freshly created buffer.
    pub fn new(num_words: u32, first_seq: u64, wrap: bool) -> Self {
        Self {
            num_words,
            prod_head: 0,
            prod_tail: 0,
            cons_head: 0,
            cons_tail: 0,
            seal: SealState::Live,
            num_allocs: 0,
            first_seq,
            wrap,
            tmin: 0.0,
            tmax: 0.0,
        }
    }

    /// Total file length this header declares.
    pub fn file_len(&self) -> u64 {
        HEADER_SIZE as u64 + self.num_words as u64 * WORD_SIZE as u64
    }

    /// Sequence number the next allocation will receive.
    pub fn next_seq(&self) -> u64 {
        self.first_seq + self.num_allocs
    }

    /// Check structural invariants against the actual file length.
    pub fn validate(&self, file_len: u64) -> Result<(), String> {
        if self.num_words < MIN_NUM_WORDS {
            return Err(format!(
                "num words ({}) should be >= {}",
                self.num_words, MIN_NUM_WORDS
            ));
        }
        if self.num_words > MAX_NUM_WORDS {
            return Err(format!(
                "num words ({}) should be <= {}",
                self.num_words, MAX_NUM_WORDS
            ));
        }
        if self.file_len() != file_len {
            return Err(format!(
                "file size should be {} but is {}",
                self.file_len(),
                file_len
            ));
        }
        for (what, cursor) in [
            ("prod head", self.prod_head),
            ("prod tail", self.prod_tail),
            ("cons head", self.cons_head),
            ("cons tail", self.cons_tail),
        ] {
            if cursor >= self.num_words {
                return Err(format!(
                    "{} ({}) should be < {}",
                    what, cursor, self.num_words
                ));
            }
        }
        Ok(())
    }

    /// Decode from the first [`HEADER_SIZE`] bytes of a file.
    pub fn from_bytes(bytes: &[u8]) -> io::Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "Buffer too small for header",
            ));
        }

        let mut cursor = io::Cursor::new(bytes);

        let num_words = cursor.read_u32::<NativeEndian>()?;
        let prod_head = cursor.read_u32::<NativeEndian>()?;
        let prod_tail = cursor.read_u32::<NativeEndian>()?;
        let cons_head = cursor.read_u32::<NativeEndian>()?;
        let cons_tail = cursor.read_u32::<NativeEndian>()?;
        let seal = cursor.read_u32::<NativeEndian>()?;
        let seal = SealState::from_u32(seal).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Unknown seal state {}", seal),
            )
        })?;
        let num_allocs = cursor.read_u64::<NativeEndian>()?;
        let first_seq = cursor.read_u64::<NativeEndian>()?;
        let wrap = cursor.read_u8()?;
        let mut padding1 = [0u8; 7];
        cursor.read_exact(&mut padding1)?;
        let tmin = cursor.read_f64::<NativeEndian>()?;
        let tmax = cursor.read_f64::<NativeEndian>()?;

        Ok(Self {
            num_words,
            prod_head,
            prod_tail,
            cons_head,
            cons_tail,
            seal,
            num_allocs,
            first_seq,
            wrap: wrap != 0,
            tmin,
            tmax,
        })
    }

    /// Encode as the file's first [`HEADER_SIZE`] bytes.
    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(HEADER_SIZE);

        buf.write_u32::<NativeEndian>(self.num_words)?;
        buf.write_u32::<NativeEndian>(self.prod_head)?;
        buf.write_u32::<NativeEndian>(self.prod_tail)?;
        buf.write_u32::<NativeEndian>(self.cons_head)?;
        buf.write_u32::<NativeEndian>(self.cons_tail)?;
        buf.write_u32::<NativeEndian>(self.seal as u32)?;
        buf.write_u64::<NativeEndian>(self.num_allocs)?;
        buf.write_u64::<NativeEndian>(self.first_seq)?;
        buf.write_u8(self.wrap as u8)?;
        buf.write_all(&[0u8; 7])?;
        buf.write_f64::<NativeEndian>(self.tmin)?;
        buf.write_f64::<NativeEndian>(self.tmax)?;

        debug_assert_eq!(buf.len(), HEADER_SIZE);

        Ok(buf)
    }
}

/// Words between `cons` and `prod`, going forward around the ring.
pub fn num_entries(num_words: u32, prod: u32, cons: u32) -> u32 {
    if prod >= cons {
        prod - cons
    } else {
        num_words - (cons - prod)
    }
}

/// Words free for production when consumption is at `cons` and production at `prod`.
pub fn num_free(num_words: u32, cons: u32, prod: u32) -> u32 {
    num_words - num_entries(num_words, prod, cons)
}
