//! Path helpers for directory-move bookkeeping.

use std::path::{Path, PathBuf};

/// Rewrite `path` from under `from` to under `to`, matching whole path
/// components only: `fo12/x` is under `fo12`, but `fo123/x` is not. Returns
/// `None` when `path` is not `from` or a descendant of it.
pub fn rewrite_prefix(path: &Path, from: &Path, to: &Path) -> Option<PathBuf> {
    let suffix = path.strip_prefix(from).ok()?;
    if suffix.as_os_str().is_empty() {
        Some(to.to_path_buf())
    } else {
        Some(to.join(suffix))
    }
}
