//! Enqueue command - append one record.

use super::open_live;
use anyhow::{Context, Result};
use std::path::Path;

/// Parse a payload word written in hex, with or without `0x`.
pub(crate) fn parse_word(s: &str) -> Result<u32> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u32::from_str_radix(digits, 16).with_context(|| format!("Invalid hex word: {s}"))
}

/// Append a record holding `words` to the buffer at `path`.
pub fn run(path: &Path, words: &[String], t_start: f64, t_stop: f64) -> Result<()> {
    if t_stop < t_start {
        anyhow::bail!("--t-stop ({t_stop}) is before --t-start ({t_start})");
    }
    let payload = words
        .iter()
        .map(|w| parse_word(w))
        .collect::<Result<Vec<_>>>()?;

    let mut rb = open_live(path)?;
    let seq = rb.header()?.next_seq();
    rb.enqueue(&payload, t_start, t_stop)
        .with_context(|| format!("Failed to enqueue into {}", path.display()))?;

    tracing::info!(path = %path.display(), words = payload.len(), "Enqueued record");
    println!("Enqueued {} words (seq {})", payload.len(), seq);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringlog_core::RingBuf;
    use tempfile::tempdir;

    #[test]
    fn parses_hex_words() {
        assert_eq!(parse_word("0xdeadbeef").unwrap(), 0xdead_beef);
        assert_eq!(parse_word("2A").unwrap(), 42);
        assert!(parse_word("0x1_0000_0000").is_err());
        assert!(parse_word("zz").is_err());
    }

    #[test]
    fn appends_record() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.r");
        RingBuf::create(&path, true, 64).unwrap();

        let words = vec!["1".to_string(), "0xff".to_string()];
        run(&path, &words, 1.0, 2.0).unwrap();

        let mut rb = RingBuf::load(&path).unwrap();
        assert_eq!(rb.dequeue().unwrap(), Some(vec![1, 0xff]));
        assert_eq!(rb.header().unwrap().tmax, 2.0);
    }

    #[test]
    fn rejects_bad_input() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.r");
        RingBuf::create(&path, true, 64).unwrap();

        assert!(run(&path, &["nope".to_string()], 0.0, 0.0).is_err());
        assert!(run(&path, &[], 2.0, 1.0).is_err());
        assert!(run(&dir.path().join("missing"), &[], 0.0, 0.0).is_err());
    }
}
