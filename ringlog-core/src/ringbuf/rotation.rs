//! Rotation of non-wrapping buffers into the archive directory.
//!
//! When a record no longer fits, the producer takes the exclusive lock and
//! seals the file: it marks the header `Sealing` so no new allocation
//! starts, waits for in-flight enqueues to commit, claims the word at the
//! producer head with a compare-and-swap and writes the EOF mark there. It
//! then records the next sequence number in the sequence store, renames the
//! file into `<name>.arc/` and creates an empty successor.
//!
//! Other handles see the seal state and remap once the rotator releases the
//! lock. Consumers move one segment at a time, through the archives they
//! fell behind on, so no record is skipped. A rotator that died half way leaves the seal behind; the next
//! producer to notice finishes its work.

use super::alloc::Placement;
use super::buffer::RingBuf;
use super::header::{EOF_MARK, HeaderFields, SealState, num_free};
use crate::archive::{ArchiveName, list_archives};
use crate::error::{Result, RingBufError};
use crate::lock::{LockGuard, LockMode};
use crate::paths::archive_dir;
use crate::seqstore::SequenceStore;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

/// Attempts at creating the successor file before rolling back.
const CREATE_ATTEMPTS: u32 = 3;

/// Backoff unit between successor creation attempts.
const CREATE_BACKOFF: Duration = Duration::from_millis(10);

/// Producer view of the mapped file.
struct ProductionState {
    fits: bool,
    eof_at_head: bool,
    free: u32,
    required: u32,
}

impl RingBuf {
    /// Archive the current file and start an empty one, regardless of
    /// occupancy.
    ///
    /// Returns `false` when there was nothing to archive or another process
    /// rotated first (the handle then maps the live file).
    pub fn rotate(&mut self) -> Result<bool> {
        let map = self.writable_mapping()?;
        let hdr = map.header();
        if hdr.wrap() {
            return Err(RingBufError::NotRotatable {
                path: self.path.clone(),
            });
        }
        if hdr.num_allocs.load(Ordering::Acquire) == 0
            && hdr.seal_state() == SealState::Live
            && !self.is_rotated_away()?
        {
            tracing::debug!(path = %self.path.display(), "Nothing to rotate");
            return Ok(false);
        }
        self.rotate_inner(true, 0)
    }

    /// Make sure the producer maps a live file and, when allowed, that a
    /// record of `num_words` fits it.
    pub(crate) fn prepare_production(&mut self, num_words: u32) -> Result<()> {
        if self.writable_mapping()?.header().seal_state() != SealState::Live {
            self.follow_rotation()?;
        }

        let state = self.production_state(num_words)?;
        if state.fits {
            if state.eof_at_head && state.free > 2 * state.required {
                // Left by a rotation that rolled back; the next length word
                // overwrites it.
                tracing::warn!(
                    path = %self.path.display(),
                    free = state.free,
                    "EOF mark at producer head of a live buffer"
                );
            }
            return Ok(());
        }

        if self.config.auto_rotate {
            self.rotate_inner(false, num_words)?;
        }
        Ok(())
    }

    /// Move from a sealed file to its successor.
    fn follow_rotation(&mut self) -> Result<()> {
        tracing::debug!(path = %self.path.display(), "Producer following rotation");
        if !self.path.exists() {
            // Either a rotation in progress or a rotator that died between
            // archiving and creating the successor; the lock tells them apart.
            let (wrap, num_words) = {
                let hdr = self.writable_mapping()?.header();
                (hdr.wrap(), hdr.num_words)
            };
            let lock = LockGuard::acquire(&self.path, LockMode::Exclusive, false)?;
            if Self::create_locked(&self.path, wrap, num_words)? {
                tracing::warn!(path = %self.path.display(), "Recreated buffer missing after rotation");
            }
            lock.release()?;
        }
        // The shared lock waits for the rotator to finish.
        self.reload()?;
        if self.writable_mapping()?.header().seal_state() != SealState::Live {
            tracing::warn!(path = %self.path.display(), "Finishing an interrupted rotation");
            self.rotate_inner(true, 0)?;
        }
        Ok(())
    }

    /// Move a consumer that drained a sealed file to the segment starting
    /// where that file ended: an archive if the consumer fell behind by
    /// more than one rotation, the live file otherwise.
    ///
    /// Returns whether the handle now maps another file.
    pub(super) fn follow_consumer(&mut self) -> Result<bool> {
        let (sealed_end, sealed_identity) = {
            let map = self.writable_mapping()?;
            (map.header().snapshot().next_seq(), map.identity())
        };

        // Mapping the live file first: every archive older than it is
        // already in place once the shared lock is granted.
        self.reload()?;
        let live_first = self.writable_mapping()?.header().snapshot().first_seq;
        if live_first != sealed_end {
            let next = list_archives(&self.path)?.into_iter().find(|(name, _)| {
                name.first_seq >= sealed_end
                    && name.first_seq < live_first
                    && name.last_seq > name.first_seq
            });
            match next {
                Some((name, archive)) => {
                    if name.first_seq != sealed_end {
                        tracing::warn!(
                            path = %self.path.display(),
                            from = sealed_end,
                            to = name.first_seq,
                            "Records missing from the archive directory"
                        );
                    }
                    tracing::debug!(
                        path = %self.path.display(),
                        archive = %archive.display(),
                        "Consumer draining archived segment"
                    );
                    self.remap_to(&archive)?;
                }
                None if live_first > sealed_end => {
                    tracing::warn!(
                        path = %self.path.display(),
                        from = sealed_end,
                        to = live_first,
                        "Records missing from the archive directory"
                    );
                }
                None => {}
            }
        }

        let moved = self.writable_mapping()?.identity() != sealed_identity;
        if moved {
            tracing::debug!(path = %self.path.display(), first_seq = sealed_end, "Consumer following rotation");
        }
        Ok(moved)
    }

    fn production_state(&self, num_words: u32) -> Result<ProductionState> {
        let map = self.writable_mapping()?;
        let hdr = map.header();
        let head = hdr.prod_head.load(Ordering::Acquire);
        let cons_tail = hdr.cons_tail.load(Ordering::Acquire);
        let required = Placement::at(map.num_words(), head, num_words).required_free(hdr.wrap());
        let free = num_free(map.num_words(), cons_tail, head);
        Ok(ProductionState {
            fits: free >= required,
            eof_at_head: map.is_eof_at(head),
            free,
            required,
        })
    }

    /// Rotate under the exclusive lock, then remap whatever is live.
    fn rotate_inner(&mut self, force: bool, num_words: u32) -> Result<bool> {
        let lock = LockGuard::acquire(&self.path, LockMode::Exclusive, false)?;

        let rotated = if self.is_rotated_away()? {
            tracing::debug!(path = %self.path.display(), "Already rotated by another process");
            false
        } else if force
            || self.writable_mapping()?.header().seal_state() != SealState::Live
            || !self.production_state(num_words)?.fits
        {
            self.rotate_file_locked()?;
            true
        } else {
            false
        };

        self.remap()?;
        lock.release()?;
        Ok(rotated)
    }

    /// Seal, archive and replace the mapped file; the exclusive lock is held.
    fn rotate_file_locked(&self) -> Result<()> {
        let map = self.writable_mapping()?;
        let hdr = map.header();

        if hdr.seal_state() != SealState::Sealed {
            hdr.set_seal_state(SealState::Sealing);
            let eof_at = match self.claim_head() {
                Ok(eof_at) => eof_at,
                Err(e) => {
                    hdr.set_seal_state(SealState::Live);
                    return Err(e);
                }
            };
            map.data()[eof_at as usize].store(EOF_MARK, Ordering::Release);
            hdr.set_seal_state(SealState::Sealed);
        }

        let fields = hdr.snapshot();
        map.flush()?;

        let archive = ArchiveName {
            first_seq: fields.first_seq,
            last_seq: fields.next_seq(),
            tmin: fields.tmin,
            tmax: fields.tmax,
        };
        SequenceStore::for_buffer(&self.path).write(archive.last_seq)?;

        let archive_path = archive_dir(&self.path).join(archive.file_name());
        std::fs::rename(&self.path, &archive_path).map_err(|e| {
            tracing::error!(
                path = %self.path.display(),
                archive = %archive_path.display(),
                error = %e,
                "Cannot archive ring buffer"
            );
            RingBufError::io(&self.path, "rename")(e)
        })?;
        tracing::info!(
            path = %self.path.display(),
            archive = %archive_path.display(),
            first_seq = archive.first_seq,
            last_seq = archive.last_seq,
            "Rotated ring buffer"
        );

        self.restore_live_buffer(&archive_path, &fields)
    }

    /// Wait for in-flight enqueues to commit, then take the word at the
    /// producer head for the EOF mark. Returns its position.
    ///
    /// Allocations that read the head before the seal state changed either
    /// land before the claim (and are waited for) or fail their CAS.
    fn claim_head(&self) -> Result<u32> {
        let map = self.writable_mapping()?;
        let hdr = map.header();
        let start = Instant::now();
        loop {
            let head = hdr.prod_head.load(Ordering::Acquire);
            let tail = hdr.prod_tail.load(Ordering::Acquire);
            if head == tail {
                let next = if head + 1 == map.num_words() { 0 } else { head + 1 };
                if hdr
                    .prod_head
                    .compare_exchange(head, next, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    return Ok(head);
                }
                continue;
            }

            let waited = start.elapsed();
            if waited > self.config.commit_timeout {
                tracing::error!(
                    path = %self.path.display(),
                    head,
                    tail,
                    "Producers did not drain before rotation"
                );
                return Err(RingBufError::CommitStalled {
                    seen: head,
                    tail,
                    waited,
                });
            }
            std::thread::yield_now();
        }
    }

    /// Create the successor, or put the archived file back if that fails.
    fn restore_live_buffer(&self, archive_path: &Path, fields: &HeaderFields) -> Result<()> {
        let mut attempt = 1;
        let create_err = loop {
            match Self::create_locked(&self.path, fields.wrap, fields.num_words) {
                Ok(_) => return Ok(()),
                Err(e) if attempt < CREATE_ATTEMPTS => {
                    tracing::warn!(
                        path = %self.path.display(),
                        attempt,
                        error = %e,
                        "Cannot create ring buffer after rotation, retrying"
                    );
                    std::thread::sleep(CREATE_BACKOFF * attempt);
                    attempt += 1;
                }
                Err(e) => break e,
            }
        };

        match std::fs::rename(archive_path, &self.path) {
            Ok(()) => {
                // Live again: give the claimed word back and reopen for producers.
                let hdr = self.writable_mapping()?.header();
                hdr.prod_head.store(fields.prod_tail, Ordering::Release);
                hdr.set_seal_state(SealState::Live);
                tracing::error!(
                    path = %self.path.display(),
                    error = %create_err,
                    "Rotation rolled back, full buffer restored"
                );
                Err(create_err)
            }
            Err(rename_err) => {
                tracing::error!(
                    path = %self.path.display(),
                    archive = %archive_path.display(),
                    error = %create_err,
                    rollback_error = %rename_err,
                    "DEGRADED: no live ring buffer after rotation"
                );
                Err(RingBufError::Degraded {
                    path: self.path.clone(),
                    archive: archive_path.to_path_buf(),
                    cause: format!("{}; rollback failed: {}", create_err, rename_err),
                })
            }
        }
    }
}
