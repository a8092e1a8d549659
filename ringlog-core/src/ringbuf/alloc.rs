//! Lock-free two-phase allocation for producers and consumers.
//!
//! Each side owns a head (reservations) and a tail (commits). Allocation
//! advances the head with a compare-and-swap; commit waits until the tail
//! reaches the position the allocation started from, then moves it past the
//! record. Commits therefore publish in allocation order.
//!
//! A record is a length word followed by its payload. A record that would
//! cross the end of the data area is placed at offset 0 instead, and the
//! length word at its original position is set to [`EOF_MARK`].

use super::buffer::RingBuf;
use super::header::{EOF_MARK, SealState, num_free};
use super::mapping::Mapping;
use crate::error::{Result, RingBufError};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

/// Busy-wait iterations before a waiting commit starts yielding.
const SPIN_LIMIT: u32 = 64;

/// Handle on an allocated record, valid until committed.
///
/// Transactions are tied to the mapping they were issued on; after a
/// rotation or reload they are refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tx {
    record_start: u32,
    len: u32,
    next: u32,
    seen: u32,
    mapping: u64,
}

impl Tx {
    /// Offset of the first payload word in the data area.
    pub fn record_start(&self) -> u32 {
        self.record_start
    }

    /// Payload length in words.
    pub fn len(&self) -> u32 {
        self.len
    }

    /// Whether the record has no payload.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Cursor value after this record.
    pub fn next(&self) -> u32 {
        self.next
    }

    /// Cursor value observed when the record was allocated.
    pub fn seen(&self) -> u32 {
        self.seen
    }

    pub(crate) fn mapping(&self) -> u64 {
        self.mapping
    }
}

/// Where a record goes when produced at a given head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Placement {
    /// Position of the length word.
    pub length_at: u32,
    /// Head after the record.
    pub next: u32,
    /// Words consumed from the free space, including any skipped tail.
    pub alloced: u32,
    /// Position that receives the EOF mark when the record is relocated.
    pub eof_at: Option<u32>,
}

impl Placement {
    /// Place a record of `num_words` payload words produced at `head`.
    pub fn at(capacity: u32, head: u32, num_words: u32) -> Self {
        let alloced = num_words + 1;
        let end = head as u64 + alloced as u64;
        if end > capacity as u64 {
            Self {
                length_at: 0,
                next: alloced,
                alloced: alloced + (capacity - head),
                eof_at: Some(head),
            }
        } else {
            Self {
                length_at: head,
                next: if end == capacity as u64 { 0 } else { end as u32 },
                alloced,
                eof_at: None,
            }
        }
    }

    /// Free words needed for the record to fit.
    ///
    /// One word always stays free so that a full buffer is distinguishable
    /// from an empty one. A rotating buffer keeps one more for the EOF mark
    /// that seals it.
    pub fn required_free(&self, wrap: bool) -> u32 {
        self.alloced + if wrap { 1 } else { 2 }
    }
}

/// Reject records that cannot fit even an empty buffer.
pub(crate) fn check_record_size(num_words: u32, capacity: u32, wrap: bool) -> Result<()> {
    let reserve = if wrap { 2 } else { 3 };
    if num_words as u64 + reserve > capacity as u64 {
        return Err(RingBufError::RecordTooLarge {
            requested: num_words,
            capacity,
        });
    }
    Ok(())
}

/// A record found in the data area.
struct Located {
    record_start: u32,
    len: u32,
    next: u32,
}

/// Decode the record whose length word is at `pos`, following an EOF mark.
///
/// Returns `None` if the length word does not describe a record that fits.
fn locate(map: &Mapping, pos: u32) -> Option<Located> {
    let data = map.data();
    let capacity = map.num_words();

    let mut at = pos;
    let mut len = data[at as usize].load(Ordering::Acquire);
    if len == EOF_MARK {
        at = 0;
        len = data[0].load(Ordering::Acquire);
    }
    if len == EOF_MARK {
        return None;
    }

    let record_start = at + 1;
    let end = record_start as u64 + len as u64;
    if end > capacity as u64 {
        return None;
    }
    Some(Located {
        record_start,
        len,
        next: if end == capacity as u64 { 0 } else { end as u32 },
    })
}

/// Wait for `tail` to reach `seen`, spinning briefly and then yielding.
fn wait_for_tail(tail: &AtomicU32, seen: u32, timeout: Duration) -> Result<()> {
    let start = Instant::now();
    let mut spins = 0u32;
    loop {
        let current = tail.load(Ordering::Acquire);
        if current == seen {
            return Ok(());
        }
        if spins < SPIN_LIMIT {
            spins += 1;
            std::hint::spin_loop();
            continue;
        }
        let waited = start.elapsed();
        if waited > timeout {
            tracing::error!(seen, tail = current, ?waited, "Commit stalled behind a predecessor");
            return Err(RingBufError::CommitStalled {
                seen,
                tail: current,
                waited,
            });
        }
        std::thread::yield_now();
    }
}

impl RingBuf {
    /// Reserve room for a record of `num_words` payload words.
    ///
    /// For a rotating buffer the handle first follows a rotation made by
    /// another process and, with `auto_rotate`, archives the file when the
    /// record does not fit. Fails with `NoRoom` when there is not enough
    /// free space; nothing is written in that case.
    pub fn enqueue_alloc(&mut self, num_words: u32) -> Result<Tx> {
        let (capacity, wrap) = {
            let map = self.writable_mapping()?;
            (map.num_words(), map.header().wrap())
        };
        check_record_size(num_words, capacity, wrap)?;

        loop {
            if !wrap {
                self.prepare_production(num_words)?;
            }
            if let Some(tx) = self.try_enqueue_alloc(num_words, wrap)? {
                return Ok(tx);
            }
            tracing::debug!(path = %self.path.display(), "Buffer sealed during allocation");
        }
    }

    /// One allocation attempt on the current mapping.
    ///
    /// Returns `None` if a rotator sealed the file first.
    fn try_enqueue_alloc(&self, num_words: u32, wrap: bool) -> Result<Option<Tx>> {
        let map = self.writable_mapping()?;
        let hdr = map.header();
        let capacity = map.num_words();
        loop {
            let seen = hdr.prod_head.load(Ordering::Acquire);
            // Read after the head: a rotator marks the file before claiming it.
            if !wrap && hdr.seal_state() != SealState::Live {
                return Ok(None);
            }
            let cons_tail = hdr.cons_tail.load(Ordering::Acquire);
            let placement = Placement::at(capacity, seen, num_words);
            let free = num_free(capacity, cons_tail, seen);
            let needed = placement.required_free(wrap);
            if free < needed {
                tracing::trace!(needed, free, "No room for record");
                return Err(RingBufError::NoRoom { needed, free });
            }

            if hdr
                .prod_head
                .compare_exchange_weak(seen, placement.next, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                continue;
            }

            let data = map.data();
            if let Some(eof_at) = placement.eof_at {
                data[eof_at as usize].store(EOF_MARK, Ordering::Release);
            }
            data[placement.length_at as usize].store(num_words, Ordering::Release);

            return Ok(Some(Tx {
                record_start: placement.length_at + 1,
                len: num_words,
                next: placement.next,
                seen,
                mapping: map.id(),
            }));
        }
    }

    /// Publish an allocated record.
    ///
    /// Waits (up to the configured commit timeout) for earlier allocations
    /// to be committed, widens the time range by `[t_start, t_stop]` and
    /// counts the record. Pass `(0.0, 0.0)` when records carry no time.
    pub fn enqueue_commit(&self, tx: &Tx, t_start: f64, t_stop: f64) -> Result<()> {
        let map = self.mapping_for(tx)?;
        let hdr = map.header();
        wait_for_tail(&hdr.prod_tail, tx.seen, self.config.commit_timeout)?;

        hdr.widen_times(t_start, t_stop);
        // Counted before publishing, so a drained rotation sees every record.
        hdr.num_allocs.fetch_add(1, Ordering::AcqRel);
        hdr.prod_tail.store(tx.next, Ordering::Release);

        if self.config.sync_on_commit {
            map.flush()?;
        }
        Ok(())
    }

    /// Reserve the oldest committed record for consumption.
    ///
    /// Returns `None` when the buffer is empty. A consumer that drained a
    /// sealed file moves on to the segment holding the next sequence number,
    /// archived or live, and keeps going from there.
    pub fn dequeue_alloc(&mut self) -> Result<Option<Tx>> {
        loop {
            if let Some(tx) = self.try_dequeue_alloc()? {
                return Ok(Some(tx));
            }
            if !self.consumer_should_follow()? || !self.follow_consumer()? {
                return Ok(None);
            }
        }
    }

    fn try_dequeue_alloc(&self) -> Result<Option<Tx>> {
        let map = self.writable_mapping()?;
        let hdr = map.header();
        loop {
            let seen = hdr.cons_head.load(Ordering::Acquire);
            let prod_tail = hdr.prod_tail.load(Ordering::Acquire);
            if seen == prod_tail {
                return Ok(None);
            }

            let Some(record) = locate(map, seen) else {
                if hdr.cons_head.load(Ordering::Acquire) != seen {
                    // Another consumer moved on while we were reading.
                    continue;
                }
                return Err(RingBufError::corrupt(
                    &self.path,
                    format!("invalid record length at word {}", seen),
                ));
            };

            if hdr
                .cons_head
                .compare_exchange_weak(seen, record.next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Ok(Some(Tx {
                    record_start: record.record_start,
                    len: record.len,
                    next: record.next,
                    seen,
                    mapping: map.id(),
                }));
            }
        }
    }

    /// Whether the consumer drained a sealed file.
    fn consumer_should_follow(&self) -> Result<bool> {
        let map = self.writable_mapping()?;
        let hdr = map.header();
        if hdr.wrap() || hdr.seal_state() != SealState::Sealed {
            return Ok(false);
        }
        // Cursors read after the seal are final.
        let cons_head = hdr.cons_head.load(Ordering::Acquire);
        Ok(cons_head == hdr.prod_tail.load(Ordering::Acquire))
    }

    /// Release a consumed record back to producers, in allocation order.
    pub fn dequeue_commit(&self, tx: &Tx) -> Result<()> {
        let map = self.writable_mapping()?;
        if map.id() != tx.mapping {
            return Err(RingBufError::StaleTransaction {
                tx_mapping: tx.mapping,
                mapping: map.id(),
            });
        }
        let hdr = map.header();
        wait_for_tail(&hdr.cons_tail, tx.seen, self.config.commit_timeout)?;
        hdr.cons_tail.store(tx.next, Ordering::Release);
        Ok(())
    }

    /// First unconsumed record, without consuming it.
    ///
    /// Works on read-only mappings, which makes it the way to scan archives.
    pub fn read_first(&self) -> Result<Option<Tx>> {
        let map = self.mapping()?;
        let from = map.header().cons_tail.load(Ordering::Acquire);
        self.read_at(map, from)
    }

    /// Record following `prev`, or `None` at the end of committed data.
    pub fn read_next(&self, prev: &Tx) -> Result<Option<Tx>> {
        let map = self.mapping_for(prev)?;
        self.read_at(map, prev.next)
    }

    fn read_at(&self, map: &Mapping, pos: u32) -> Result<Option<Tx>> {
        if pos == map.header().prod_tail.load(Ordering::Acquire) {
            return Ok(None);
        }
        let record = locate(map, pos).ok_or_else(|| {
            RingBufError::corrupt(&self.path, format!("invalid record length at word {}", pos))
        })?;
        Ok(Some(Tx {
            record_start: record.record_start,
            len: record.len,
            next: record.next,
            seen: pos,
            mapping: map.id(),
        }))
    }

    /// Iterate over the payloads of all unconsumed records, oldest first.
    pub fn records(&self) -> Records<'_> {
        Records {
            rb: self,
            last: None,
            words: 0,
            done: false,
        }
    }

    /// Copy `words` into the record of `tx`, starting `offset` words in.
    pub fn write_payload(&self, tx: &Tx, offset: u32, words: &[u32]) -> Result<()> {
        let map = self.mapping_for(tx)?;
        if !map.is_writable() {
            return Err(RingBufError::ReadOnly {
                path: self.path.clone(),
            });
        }
        let range = payload_range(tx, offset, words.len())?;
        for (slot, word) in map.data()[range].iter().zip(words) {
            slot.store(*word, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Copy the payload of `tx` out of the buffer.
    pub fn payload(&self, tx: &Tx) -> Result<Vec<u32>> {
        let map = self.mapping_for(tx)?;
        let range = payload_range(tx, 0, tx.len as usize)?;
        Ok(map.data()[range]
            .iter()
            .map(|w| w.load(Ordering::Relaxed))
            .collect())
    }

    /// Allocate, fill and commit one record.
    pub fn enqueue(&mut self, words: &[u32], t_start: f64, t_stop: f64) -> Result<()> {
        let num_words = u32::try_from(words.len()).map_err(|_| RingBufError::RecordTooLarge {
            requested: u32::MAX,
            capacity: self.mapping().map(Mapping::num_words).unwrap_or(0),
        })?;
        let tx = self.enqueue_alloc(num_words)?;
        self.write_payload(&tx, 0, words)?;
        self.enqueue_commit(&tx, t_start, t_stop)
    }

    /// Enqueue a byte payload, zero-padded to whole words.
    ///
    /// The byte length is not recorded; callers that need it put it in the
    /// payload themselves.
    pub fn enqueue_bytes(&mut self, bytes: &[u8], t_start: f64, t_stop: f64) -> Result<()> {
        self.enqueue(&words_from_bytes(bytes), t_start, t_stop)
    }

    /// Consume one record and return its payload.
    pub fn dequeue(&mut self) -> Result<Option<Vec<u32>>> {
        let Some(tx) = self.dequeue_alloc()? else {
            return Ok(None);
        };
        let payload = self.payload(&tx)?;
        self.dequeue_commit(&tx)?;
        Ok(Some(payload))
    }
}

fn payload_range(tx: &Tx, offset: u32, len: usize) -> Result<std::ops::Range<usize>> {
    let end = offset as u64 + len as u64;
    if end > tx.len as u64 {
        return Err(RingBufError::PayloadBounds {
            offset,
            len: u32::try_from(len).unwrap_or(u32::MAX),
            size: tx.len,
        });
    }
    let start = tx.record_start as usize + offset as usize;
    Ok(start..start + len)
}

/// Pack bytes into native-endian words, zero-padding the last one.
pub fn words_from_bytes(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks(4)
        .map(|chunk| {
            let mut word = [0u8; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            u32::from_ne_bytes(word)
        })
        .collect()
}

/// Unpack words into native-endian bytes.
pub fn bytes_from_words(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_ne_bytes()).collect()
}

/// Iterator over unconsumed payloads, see [`RingBuf::records`].
pub struct Records<'a> {
    rb: &'a RingBuf,
    last: Option<Tx>,
    words: u64,
    done: bool,
}

impl Iterator for Records<'_> {
    type Item = Result<Vec<u32>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let step = match &self.last {
            None => self.rb.read_first(),
            Some(prev) => self.rb.read_next(prev),
        };
        let tx = match step {
            Ok(Some(tx)) => tx,
            Ok(None) => {
                self.done = true;
                return None;
            }
            Err(e) => {
                self.done = true;
                return Some(Err(e));
            }
        };

        // Lengths that never lead back to the tail would loop forever.
        self.words += tx.len as u64 + 1;
        let capacity = match self.rb.mapping() {
            Ok(map) => map.num_words() as u64,
            Err(e) => {
                self.done = true;
                return Some(Err(e));
            }
        };
        if self.words > capacity {
            self.done = true;
            return Some(Err(RingBufError::corrupt(
                self.rb.path(),
                "records do not lead back to the producer tail",
            )));
        }

        self.last = Some(tx);
        Some(self.rb.payload(&tx))
    }
}
