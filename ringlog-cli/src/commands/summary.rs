//! Summary command - show header values, occupancy and archives.

use super::{is_archive_path, open_for_inspection};
use anyhow::Result;
use ringlog_core::{ArchiveName, RingBufSummary, list_archives};
use serde::Serialize;
use std::path::Path;

#[derive(Serialize)]
struct Report {
    #[serde(flatten)]
    summary: RingBufSummary,
    archives: Vec<ArchiveName>,
}

/// Print the summary of the buffer or archive at `path`.
pub fn run(path: &Path, json: bool) -> Result<()> {
    let rb = open_for_inspection(path)?;
    let summary = rb.summary()?;
    let archives = if is_archive_path(path) {
        Vec::new()
    } else {
        list_archives(path)?.into_iter().map(|(name, _)| name).collect()
    };

    if json {
        let report = Report { summary, archives };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let h = &summary.header;
    println!("Ring Buffer: {}", summary.path.display());
    println!(
        "  Mode: {}{}",
        if h.wrap { "wrap" } else { "rotate" },
        if summary.read_only { " (read-only)" } else { "" }
    );
    println!("  Capacity: {} words", h.num_words);
    println!(
        "  Used: {} words ({:.1}%), free: {} words",
        summary.words_used,
        summary.fill_ratio * 100.0,
        summary.words_free
    );
    println!();
    println!("Cursors:");
    println!("  Producer: head {} tail {}", h.prod_head, h.prod_tail);
    println!("  Consumer: head {} tail {}", h.cons_head, h.cons_tail);
    println!("  Seal: {:?}", h.seal);
    if !summary.consistent {
        println!("  Warning: transactions in flight or left by a crashed process");
    }
    println!();
    println!("Sequence:");
    println!("  First: {}", h.first_seq);
    println!("  Allocated: {}", h.num_allocs);
    println!("  Next: {}", summary.next_seq);
    println!("  Time range: {} .. {}", h.tmin, h.tmax);

    if !archives.is_empty() {
        println!();
        println!("Archives: {}", archives.len());
        for name in &archives {
            println!(
                "  [{}, {}) {} records, t {} .. {}",
                name.first_seq,
                name.last_seq,
                name.num_records(),
                name.tmin,
                name.tmax
            );
        }
    }

    Ok(())
}
