//! CLI command implementations.

pub mod archives;
pub mod create;
pub mod dump;
pub mod enqueue;
pub mod repair;
pub mod rotate;
pub mod summary;

use anyhow::{Context, Result};
use ringlog_core::archive::ARCHIVE_EXTENSION;
use ringlog_core::{RingBuf, RingBufConfig};
use std::path::Path;

/// Words shown per record before the preview is cut.
const PREVIEW_WORDS: usize = 8;

/// Whether `path` names an archived segment rather than a live buffer.
pub(crate) fn is_archive_path(path: &Path) -> bool {
    let in_archive_dir = path
        .parent()
        .and_then(|p| p.extension())
        .is_some_and(|ext| ext == "arc");
    let has_extension = path.extension().is_some_and(|ext| ext == ARCHIVE_EXTENSION);
    in_archive_dir && has_extension
}

/// Map a buffer for reading. Archives are mapped read-only.
pub(crate) fn open_for_inspection(path: &Path) -> Result<RingBuf> {
    if !path.exists() {
        anyhow::bail!("Ring buffer not found: {}", path.display());
    }
    if is_archive_path(path) {
        RingBuf::load_archive(path)
            .with_context(|| format!("Failed to load archive {}", path.display()))
    } else {
        open_live(path)
    }
}

/// Map a live buffer for producing or consuming.
pub(crate) fn open_live(path: &Path) -> Result<RingBuf> {
    if !path.exists() {
        anyhow::bail!("Ring buffer not found: {}", path.display());
    }
    RingBuf::load_with(path, RingBufConfig::from_env())
        .with_context(|| format!("Failed to load ring buffer {}", path.display()))
}

/// Render the first words of a payload as hex.
pub(crate) fn hex_preview(words: &[u32]) -> String {
    let mut out = words
        .iter()
        .take(PREVIEW_WORDS)
        .map(|w| format!("{w:08x}"))
        .collect::<Vec<_>>()
        .join(" ");
    if words.len() > PREVIEW_WORDS {
        out.push_str(&format!(" ... (+{} words)", words.len() - PREVIEW_WORDS));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archive_paths_are_recognized() {
        assert!(is_archive_path(Path::new(
            "/logs/events.r.arc/0000000000000000_0000000000000008_0x0p+0_0x0p+0.b"
        )));
        assert!(!is_archive_path(Path::new("/logs/events.r")));
        assert!(!is_archive_path(Path::new("/logs/events.r.arc/max")));
    }

    #[test]
    fn preview_is_truncated() {
        assert_eq!(hex_preview(&[1, 0xdeadbeef]), "00000001 deadbeef");
        let long: Vec<u32> = (0..10).collect();
        let preview = hex_preview(&long);
        assert!(preview.starts_with("00000000 00000001"));
        assert!(preview.ends_with("... (+2 words)"));
        assert_eq!(hex_preview(&[]), "");
    }
}
