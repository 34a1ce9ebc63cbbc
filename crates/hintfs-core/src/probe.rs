//! The raw stat capability behind the cache.
//!
//! The cache never touches the filesystem directly; it goes through this
//! trait so hosts can substitute their own stat layer and tests can script
//! answers without a disk.

use std::path::Path;

/// Ground-truth path queries. Implementations must be cheap to call
/// repeatedly and must not cache (the layers above do that).
pub trait PathProbe: Send + Sync {
    /// Does the path currently exist on disk?
    fn exists(&self, path: &Path) -> bool;

    /// Is the path a regular file?
    fn is_file(&self, path: &Path) -> bool;

    /// Is the path a directory?
    fn is_dir(&self, path: &Path) -> bool;

    /// Windows only: is the path a reachable UNC host root (`\\host`)?
    /// Always false elsewhere.
    fn is_compute_node(&self, path: &Path) -> bool;

    /// Can the path be represented as a watched filesystem handle?
    /// Hosts with restricted namespaces override this; the default says yes
    /// for anything that exists.
    fn is_convertible(&self, path: &Path) -> bool {
        self.exists(path)
    }
}

/// Production probe backed by `std::fs`.
///
/// Uses `symlink_metadata` so a dangling symlink still reports as existing,
/// matching what a directory listing shows the user.
pub struct DiskProbe;

impl PathProbe for DiskProbe {
    fn exists(&self, path: &Path) -> bool {
        std::fs::symlink_metadata(path).is_ok()
    }

    fn is_file(&self, path: &Path) -> bool {
        std::fs::metadata(path).map(|m| m.is_file()).unwrap_or(false)
    }

    fn is_dir(&self, path: &Path) -> bool {
        std::fs::metadata(path).map(|m| m.is_dir()).unwrap_or(false)
    }

    fn is_compute_node(&self, path: &Path) -> bool {
        if !cfg!(windows) {
            return false;
        }
        // A bare \\host renders with no parent and no file name.
        let raw = path.to_string_lossy();
        raw.starts_with("\\\\") && self.exists(path) && !self.is_file(path)
    }
}
