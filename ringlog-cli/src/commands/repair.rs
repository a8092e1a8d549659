//! Repair command - recover from a crashed producer or consumer.

use anyhow::{Context, Result};
use ringlog_core::{SequenceStore, repair_path};
use std::path::Path;

/// Repair the buffer at `path` and reconcile its sequence store.
///
/// Must only be run while no other process uses the buffer.
pub fn run(path: &Path) -> Result<()> {
    if !path.exists() {
        anyhow::bail!("Ring buffer not found: {}", path.display());
    }
    let changed =
        repair_path(path).with_context(|| format!("Failed to repair {}", path.display()))?;
    let max_seq = SequenceStore::for_buffer(path).read()?;

    if changed {
        println!("Repaired {}", path.display());
    } else {
        println!("Nothing to repair in {}", path.display());
    }
    println!("  Sequence store: {max_seq}");
    Ok(())
}
