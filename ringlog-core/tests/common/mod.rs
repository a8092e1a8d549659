//! Common test utilities for integration tests.

#![allow(dead_code)]

use ringlog_core::{RingBuf, RingBufConfig};
use std::path::{Path, PathBuf};

/// Path of the buffer under a test directory.
pub fn buffer_path(dir: &Path) -> PathBuf {
    dir.join("logs").join("events.r")
}

/// A rotating buffer that only rotates when asked to.
pub fn manual_archival(num_words: u32) -> RingBufConfig {
    RingBufConfig::archival(num_words).with_auto_rotate(false)
}

/// Open a wrapping buffer of `num_words` words.
pub fn open_wrapping(path: &Path, num_words: u32) -> RingBuf {
    RingBuf::open(path, RingBufConfig::default().with_num_words(num_words)).unwrap()
}

/// Payload carrying a producer id, a counter and a trailing checksum.
pub fn tagged_payload(producer: u32, counter: u32, extra: usize) -> Vec<u32> {
    let mut words = vec![producer, counter];
    words.extend((0..extra as u32).map(|k| counter.wrapping_mul(31).wrapping_add(k)));
    words.push(checksum(&words));
    words
}

/// Split a payload made by [`tagged_payload`], checking its checksum.
pub fn untag(words: &[u32]) -> (u32, u32) {
    assert!(words.len() >= 3, "payload too short: {:?}", words);
    let (body, sum) = words.split_at(words.len() - 1);
    assert_eq!(checksum(body), sum[0], "torn record {:?}", words);
    (body[0], body[1])
}

fn checksum(words: &[u32]) -> u32 {
    words
        .iter()
        .fold(0x811c_9dc5u32, |h, w| (h ^ w).wrapping_mul(0x0100_0193))
}
