//! Archives command - list archived segments.

use anyhow::Result;
use ringlog_core::{SequenceStore, list_archives, paths::archive_dir};
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Serialize)]
struct Entry {
    #[serde(flatten)]
    name: ringlog_core::ArchiveName,
    path: PathBuf,
}

/// List the archives of the buffer at `path`, oldest first.
pub fn run(path: &Path, json: bool) -> Result<()> {
    let archives = list_archives(path)?;

    if json {
        let entries: Vec<Entry> = archives
            .into_iter()
            .map(|(name, path)| Entry { name, path })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if archives.is_empty() {
        println!("No archives in {}", archive_dir(path).display());
        return Ok(());
    }

    println!("{:>16}  {:>16}  {:>8}  {:>12}  {:>12}  FILE", "FIRST", "LAST", "RECORDS", "TMIN", "TMAX");
    for (name, file) in &archives {
        println!(
            "{:>16}  {:>16}  {:>8}  {:>12}  {:>12}  {}",
            name.first_seq,
            name.last_seq,
            name.num_records(),
            name.tmin,
            name.tmax,
            file.file_name().map(|f| f.to_string_lossy()).unwrap_or_default()
        );
    }
    println!();
    println!("Sequence store: {}", SequenceStore::for_buffer(path).read()?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringlog_core::RingBuf;
    use tempfile::tempdir;

    #[test]
    fn lists_in_both_formats() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.r");
        run(&path, false).unwrap();

        RingBuf::create(&path, false, 64).unwrap();
        let mut rb = RingBuf::load(&path).unwrap();
        rb.enqueue(&[1], 0.5, 1.5).unwrap();
        rb.rotate().unwrap();

        run(&path, false).unwrap();
        run(&path, true).unwrap();
    }
}
