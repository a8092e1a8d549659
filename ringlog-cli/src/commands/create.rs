//! Create command - create a ring buffer file.

use anyhow::{Context, Result};
use ringlog_core::{RingBuf, RingBufConfig};
use std::path::Path;

/// Create the buffer at `path`, or report the existing one.
pub fn run(path: &Path, words: Option<u32>, no_wrap: bool) -> Result<()> {
    let mut config = RingBufConfig::from_env();
    if let Some(words) = words {
        config = config.with_num_words(words);
    }
    if no_wrap {
        config = config.with_wrap(false);
    }
    config.validate().context("Invalid buffer configuration")?;

    let existed = path.exists();
    RingBuf::create_with(path, &config)
        .with_context(|| format!("Failed to create ring buffer {}", path.display()))?;

    let rb = RingBuf::load_with(path, config)
        .with_context(|| format!("Failed to load ring buffer {}", path.display()))?;
    let header = rb.header()?;

    if existed {
        println!("Ring buffer already exists: {}", path.display());
    } else {
        println!("Created ring buffer: {}", path.display());
    }
    println!("  Capacity: {} words", header.num_words);
    println!("  Mode: {}", if header.wrap { "wrap" } else { "rotate" });
    println!("  First sequence: {}", header.first_seq);

    Ok(())
}
