//! Rotate command - archive a non-wrapping buffer now.

use super::open_live;
use anyhow::{Context, Result};
use std::path::Path;

/// Rotate the buffer at `path`; an empty buffer is left as it is.
pub fn run(path: &Path) -> Result<()> {
    let mut rb = open_live(path)?;
    if rb.header()?.wrap {
        anyhow::bail!("Wrapping buffers are never rotated: {}", path.display());
    }

    let rotated = rb
        .rotate()
        .with_context(|| format!("Failed to rotate {}", path.display()))?;
    if rotated {
        let header = rb.header()?;
        println!("Rotated {}, next sequence {}", path.display(), header.first_seq);
    } else {
        println!("Nothing to rotate: {} is empty", path.display());
    }
    Ok(())
}
