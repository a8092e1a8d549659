//! Dump command - print unconsumed records.

use super::{hex_preview, is_archive_path, open_for_inspection, open_live};
use anyhow::{Context, Result};
use ringlog_core::{RingBuf, Tx};
use std::path::Path;

/// Offsets and lengths of the unconsumed records, oldest first.
fn unconsumed(rb: &RingBuf) -> Result<Vec<Tx>> {
    let capacity = rb.header()?.num_words as u64;
    let mut records = Vec::new();
    let mut words = 0u64;
    let mut next = rb.read_first()?;
    while let Some(tx) = next {
        words += tx.len() as u64 + 1;
        if words > capacity {
            anyhow::bail!("Record chain longer than the buffer, run repair");
        }
        next = rb.read_next(&tx)?;
        records.push(tx);
    }
    Ok(records)
}

/// Sequence number of the oldest unconsumed record of the mapped file.
///
/// Exact while no producer is mid-transaction and no other consumer runs.
fn oldest_seq(rb: &RingBuf) -> Result<u64> {
    let pending = unconsumed(rb)?.len() as u64;
    Ok(rb.header()?.next_seq().saturating_sub(pending))
}

/// Print up to `limit` records of the buffer at `path`, consuming them if
/// `consume` is set.
pub fn run(path: &Path, limit: Option<usize>, consume: bool) -> Result<()> {
    if consume && is_archive_path(path) {
        anyhow::bail!("Archives are read-only: {}", path.display());
    }
    let mut rb = if consume {
        open_live(path)?
    } else {
        open_for_inspection(path)?
    };

    let limit = limit.unwrap_or(usize::MAX);

    if consume {
        let mut consumed = 0usize;
        while consumed < limit {
            let Some(tx) = rb.dequeue_alloc()? else {
                break;
            };
            // The allocation may have moved the handle to the next segment.
            let seq = oldest_seq(&rb)?;
            let payload = rb.payload(&tx)?;
            rb.dequeue_commit(&tx).context("Failed to consume record")?;
            print_record(seq, &tx, &payload);
            consumed += 1;
        }
        println!("{} records consumed", consumed);
        return Ok(());
    }

    let pending = unconsumed(&rb)?;
    let first_seq = rb.header()?.next_seq().saturating_sub(pending.len() as u64);
    let mut shown = 0usize;
    for (i, tx) in pending.iter().take(limit).enumerate() {
        let payload = rb.payload(tx)?;
        print_record(first_seq + i as u64, tx, &payload);
        shown += 1;
    }
    println!("{} of {} records shown", shown, pending.len());
    Ok(())
}

fn print_record(seq: u64, tx: &Tx, payload: &[u32]) {
    println!(
        "seq {:>6}  offset {:>8}  len {:>6}  {}",
        seq,
        tx.record_start(),
        tx.len(),
        hex_preview(payload)
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringlog_core::RingBufConfig;
    use tempfile::tempdir;

    #[test]
    fn dump_leaves_records_and_consume_removes_them() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.r");
        RingBuf::create(&path, true, 64).unwrap();
        let mut rb = RingBuf::load(&path).unwrap();
        for i in 0..3 {
            rb.enqueue(&[i, i + 1], 0.0, 0.0).unwrap();
        }

        let pending = unconsumed(&rb).unwrap();
        assert_eq!(pending.len(), 3);
        assert_eq!(pending[1].record_start(), 4);

        run(&path, None, false).unwrap();
        assert_eq!(unconsumed(&rb).unwrap().len(), 3);

        run(&path, Some(2), true).unwrap();
        assert_eq!(rb.dequeue().unwrap(), Some(vec![2, 3]));
        assert_eq!(rb.dequeue().unwrap(), None);
    }

    #[test]
    fn sequence_follows_consumer_into_next_segment() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.r");
        let config = RingBufConfig::archival(64).with_auto_rotate(false);
        let mut producer = RingBuf::open(&path, config.clone()).unwrap();
        let mut consumer = RingBuf::load_with(&path, config).unwrap();

        producer.enqueue(&[10], 0.0, 0.0).unwrap();
        producer.enqueue(&[11], 0.0, 0.0).unwrap();
        assert!(producer.rotate().unwrap());
        producer.enqueue(&[12], 0.0, 0.0).unwrap();

        let mut seqs = Vec::new();
        while let Some(tx) = consumer.dequeue_alloc().unwrap() {
            seqs.push(oldest_seq(&consumer).unwrap());
            consumer.dequeue_commit(&tx).unwrap();
        }
        assert_eq!(seqs, vec![0, 1, 2]);
    }
}
