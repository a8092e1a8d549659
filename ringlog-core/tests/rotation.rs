//! Integration tests for rotation of non-wrapping buffers.

mod common;

use ringlog_core::paths::archive_dir;
use ringlog_core::ringbuf::{EOF_MARK, HEADER_SIZE, SealState, WORD_SIZE};
use ringlog_core::{RingBuf, RingBufConfig, RingBufError, SequenceStore, list_archives};
use tempfile::tempdir;

use common::{buffer_path, manual_archival};

#[test]
fn full_buffer_rotates_into_archive() {
    let dir = tempdir().unwrap();
    let path = buffer_path(dir.path());
    let mut rb = RingBuf::open(&path, manual_archival(100)).unwrap();

    for i in 0..8u32 {
        rb.enqueue(&[i; 10], 0.0, 0.0).unwrap();
    }
    let before = rb.header().unwrap();
    let err = rb.enqueue(&[8; 10], 0.0, 0.0).unwrap_err();
    assert!(err.is_no_room(), "expected NoRoom, got {}", err);
    assert_eq!(rb.header().unwrap(), before);

    assert!(rb.rotate().unwrap());

    let expected = archive_dir(&path).join(
        "0000000000000000_0000000000000008_0x0p+0_0x0p+0.b",
    );
    assert!(expected.is_file());

    let header = rb.header().unwrap();
    assert_eq!(header.first_seq, 8);
    assert_eq!(header.num_allocs, 0);
    assert_eq!(header.prod_tail, 0);
    assert_eq!(header.cons_tail, 0);
    assert_eq!(SequenceStore::for_buffer(&path).read().unwrap(), 8);

    // The record that did not fit goes into the new file.
    rb.enqueue(&[8; 10], 0.0, 0.0).unwrap();
    assert_eq!(rb.header().unwrap().next_seq(), 9);
}

#[test]
fn repeated_rotation_keeps_sequence_contiguous() {
    let dir = tempdir().unwrap();
    let path = buffer_path(dir.path());
    let mut rb = RingBuf::open(&path, RingBufConfig::archival(32)).unwrap();

    let total = 50u32;
    for seq in 0..total {
        rb.enqueue(&[seq, seq, seq], seq as f64 + 1.0, seq as f64 + 1.5).unwrap();
    }

    let archives = list_archives(&path).unwrap();
    assert!(archives.len() >= 2);
    assert_eq!(archives[0].0.first_seq, 0);
    for pair in archives.windows(2) {
        assert_eq!(pair[0].0.last_seq, pair[1].0.first_seq);
    }

    let last = archives.last().unwrap().0.last_seq;
    let header = rb.header().unwrap();
    assert_eq!(header.first_seq, last);
    assert_eq!(header.next_seq(), total as u64);
    assert_eq!(SequenceStore::for_buffer(&path).read().unwrap(), last);

    // Every archived record is where its name says it is.
    let mut next = 0u32;
    for (name, archive_path) in &archives {
        assert_eq!(name.tmin, name.first_seq as f64 + 1.0);
        assert_eq!(name.tmax, (name.last_seq - 1) as f64 + 1.5);

        let archived = RingBuf::load_archive(archive_path).unwrap();
        assert!(archived.is_read_only());
        for payload in archived.records() {
            assert_eq!(payload.unwrap(), vec![next; 3]);
            next += 1;
        }
        assert_eq!(next as u64, name.last_seq);
    }
}

#[test]
fn consumer_follows_rotation() {
    let dir = tempdir().unwrap();
    let path = buffer_path(dir.path());
    let mut producer = RingBuf::open(&path, manual_archival(64)).unwrap();
    let mut consumer = RingBuf::load_with(&path, manual_archival(64)).unwrap();

    for i in 0..3u32 {
        producer.enqueue(&[i], 0.0, 0.0).unwrap();
    }
    assert_eq!(consumer.dequeue().unwrap(), Some(vec![0]));

    assert!(producer.rotate().unwrap());
    producer.enqueue(&[3], 0.0, 0.0).unwrap();
    producer.enqueue(&[4], 0.0, 0.0).unwrap();

    // The rest of the sealed file first, then the live one.
    let mut seen = Vec::new();
    while let Some(words) = consumer.dequeue().unwrap() {
        seen.push(words[0]);
    }
    assert_eq!(seen, vec![1, 2, 3, 4]);
    assert!(!consumer.is_rotated_away().unwrap());
}

#[test]
fn lagging_consumer_drains_every_archived_segment() {
    let dir = tempdir().unwrap();
    let path = buffer_path(dir.path());
    let mut producer = RingBuf::open(&path, manual_archival(64)).unwrap();
    let mut consumer = RingBuf::load_with(&path, manual_archival(64)).unwrap();

    producer.enqueue(&[1], 0.0, 0.0).unwrap();
    assert!(producer.rotate().unwrap());
    producer.enqueue(&[2], 0.0, 0.0).unwrap();
    producer.enqueue(&[3], 0.0, 0.0).unwrap();
    assert!(producer.rotate().unwrap());
    producer.enqueue(&[4], 0.0, 0.0).unwrap();

    let mut seen = Vec::new();
    while let Some(words) = consumer.dequeue().unwrap() {
        seen.push(words[0]);
    }
    assert_eq!(seen, vec![1, 2, 3, 4]);
    assert!(!consumer.is_rotated_away().unwrap());

    // Later records arrive through the live file.
    producer.enqueue(&[5], 0.0, 0.0).unwrap();
    assert_eq!(consumer.dequeue().unwrap(), Some(vec![5]));
    assert_eq!(consumer.dequeue().unwrap(), None);
}

#[test]
fn consumer_skips_deleted_segment() {
    let dir = tempdir().unwrap();
    let path = buffer_path(dir.path());
    let mut producer = RingBuf::open(&path, manual_archival(64)).unwrap();
    let mut consumer = RingBuf::load_with(&path, manual_archival(64)).unwrap();

    for i in 1..=3u32 {
        producer.enqueue(&[i], 0.0, 0.0).unwrap();
        assert!(producer.rotate().unwrap());
    }
    producer.enqueue(&[4], 0.0, 0.0).unwrap();

    let (name, middle) = list_archives(&path).unwrap().remove(1);
    assert_eq!((name.first_seq, name.last_seq), (1, 2));
    std::fs::remove_file(middle).unwrap();

    let mut seen = Vec::new();
    while let Some(words) = consumer.dequeue().unwrap() {
        seen.push(words[0]);
    }
    assert_eq!(seen, vec![1, 3, 4]);
}

#[test]
fn consumer_of_stranded_sealed_file_stops() {
    use std::os::unix::fs::FileExt;

    let dir = tempdir().unwrap();
    let path = buffer_path(dir.path());
    let mut rb = RingBuf::open(&path, manual_archival(64)).unwrap();
    rb.enqueue(&[1], 0.0, 0.0).unwrap();
    let tail = rb.header().unwrap().prod_tail;
    drop(rb);

    // Sealed in place by a rotator that never renamed it.
    let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
    file.write_at(&EOF_MARK.to_ne_bytes(), (HEADER_SIZE + tail as usize * WORD_SIZE) as u64)
        .unwrap();
    file.write_at(&2u32.to_ne_bytes(), 20).unwrap();

    let mut consumer = RingBuf::load_with(&path, manual_archival(64)).unwrap();
    assert_eq!(consumer.dequeue().unwrap(), Some(vec![1]));
    assert_eq!(consumer.dequeue().unwrap(), None);
    assert!(list_archives(&path).unwrap().is_empty());
}

#[test]
fn producer_follows_rotation_by_peer() {
    let dir = tempdir().unwrap();
    let path = buffer_path(dir.path());
    let mut first = RingBuf::open(&path, manual_archival(64)).unwrap();
    let mut second = RingBuf::load_with(&path, manual_archival(64)).unwrap();

    first.enqueue(&[1], 0.0, 0.0).unwrap();
    second.enqueue(&[2], 0.0, 0.0).unwrap();
    assert!(first.rotate().unwrap());

    // The second handle still maps the sealed file and must move on.
    assert!(second.is_rotated_away().unwrap());
    second.enqueue(&[3], 0.0, 0.0).unwrap();
    assert!(!second.is_rotated_away().unwrap());

    let header = first.header().unwrap();
    assert_eq!(header.first_seq, 2);
    assert_eq!(header.num_allocs, 1);

    assert!(second.rotate().unwrap());
    assert_eq!(list_archives(&path).unwrap().len(), 2);
}

#[test]
fn stale_seal_in_live_buffer_is_written_over() {
    use std::os::unix::fs::FileExt;

    let dir = tempdir().unwrap();
    let path = buffer_path(dir.path());
    let mut rb = RingBuf::open(&path, manual_archival(64)).unwrap();
    rb.enqueue(&[1], 0.0, 0.0).unwrap();

    // A seal left behind by a rotation that was rolled back.
    let head = rb.header().unwrap().prod_head;
    let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
    file.write_at(&EOF_MARK.to_ne_bytes(), (HEADER_SIZE + head as usize * WORD_SIZE) as u64)
        .unwrap();

    rb.enqueue(&[2], 0.0, 0.0).unwrap();
    assert!(list_archives(&path).unwrap().is_empty());
    let payloads: Vec<_> = rb.records().map(|r| r.unwrap()).collect();
    assert_eq!(payloads, vec![vec![1], vec![2]]);
}

#[test]
fn archives_cannot_be_written() {
    let dir = tempdir().unwrap();
    let path = buffer_path(dir.path());
    let mut rb = RingBuf::open(&path, manual_archival(64)).unwrap();
    rb.enqueue(&[1, 2, 3], 0.0, 0.0).unwrap();
    rb.rotate().unwrap();

    let (_, archive_path) = list_archives(&path).unwrap().remove(0);
    let mut archived = RingBuf::load_archive(&archive_path).unwrap();
    assert!(matches!(
        archived.enqueue(&[4], 0.0, 0.0),
        Err(RingBufError::ReadOnly { .. })
    ));
    assert!(matches!(archived.dequeue(), Err(RingBufError::ReadOnly { .. })));
    assert!(matches!(archived.rotate(), Err(RingBufError::ReadOnly { .. })));
    assert_eq!(archived.read_first().unwrap().map(|tx| tx.len()), Some(3));
}

#[test]
fn interrupted_rotation_is_finished_by_next_producer() {
    use std::os::unix::fs::FileExt;

    let dir = tempdir().unwrap();
    let path = buffer_path(dir.path());
    let mut rb = RingBuf::open(&path, manual_archival(64)).unwrap();
    rb.enqueue(&[1], 0.0, 0.0).unwrap();
    rb.enqueue(&[2], 0.0, 0.0).unwrap();
    let tail = rb.header().unwrap().prod_tail;
    drop(rb);

    // A rotator sealed the file and died before renaming it.
    let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
    file.write_at(&EOF_MARK.to_ne_bytes(), (HEADER_SIZE + tail as usize * WORD_SIZE) as u64)
        .unwrap();
    file.write_at(&2u32.to_ne_bytes(), 20).unwrap();

    let mut rb = RingBuf::load_with(&path, manual_archival(64)).unwrap();
    assert_eq!(rb.header().unwrap().seal, SealState::Sealed);
    rb.enqueue(&[3], 0.0, 0.0).unwrap();

    let archives = list_archives(&path).unwrap();
    assert_eq!(archives.len(), 1);
    assert_eq!((archives[0].0.first_seq, archives[0].0.last_seq), (0, 2));

    let header = rb.header().unwrap();
    assert_eq!(header.seal, SealState::Live);
    assert_eq!(header.first_seq, 2);
    assert_eq!(header.num_allocs, 1);
}
