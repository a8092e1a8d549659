//! Names of the files that accompany a ring buffer.
//!
//! For a buffer at `<name>`:
//! - `<name>.lock` is the advisory lock file
//! - `<name>.arc/` holds archived segments
//! - `<name>.arc/max` is the sequence store

use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Name of the sequence store inside the archive directory.
pub const MAX_FILE_NAME: &str = "max";

/// Append `suffix` to the last component of `path`.
fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Path of the lock file guarding creation and rotation of `rb_path`.
pub fn lock_path(rb_path: &Path) -> PathBuf {
    with_suffix(rb_path, ".lock")
}

/// Directory receiving the archives of `rb_path`.
pub fn archive_dir(rb_path: &Path) -> PathBuf {
    with_suffix(rb_path, ".arc")
}

/// Path of the sequence store of `rb_path`.
pub fn max_seq_path(rb_path: &Path) -> PathBuf {
    archive_dir(rb_path).join(MAX_FILE_NAME)
}

/// Create the missing parent directories of `path`, owner-only.
pub(crate) fn create_parent_dirs(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => create_private_dir_all(parent),
        _ => Ok(()),
    }
}

pub(crate) fn create_private_dir_all(dir: &Path) -> std::io::Result<()> {
    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(dir)
}
