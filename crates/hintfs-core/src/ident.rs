//! Path identity: stable small-integer ids for normalized path strings.

use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Stable identifier for a path under the allocator's normalization policy.
///
/// Two paths the allocator considers equal (same string after normalization,
/// honoring the platform's case-sensitivity policy) share a `PathId`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PathId(u32);

impl PathId {
    /// Creates a PathId from a raw u32 value.
    pub fn new(id: u32) -> Self {
        PathId(id)
    }

    /// Returns the raw u32 value of this id.
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for PathId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The injected identity allocator: normalized path string to stable id.
pub trait PathIdentity: Send + Sync {
    /// Returns the stable id for `path`, allocating one on first sight.
    fn identity_of(&self, path: &Path) -> PathId;
}

/// Default interning allocator backed by a concurrent map.
///
/// Normalization: trailing separators are trimmed, and on Windows the string
/// is lowercased (case-insensitive filesystems). Separator style is taken
/// as-is; callers are expected to hand in absolute platform paths.
pub struct PathInterner {
    table: DashMap<String, PathId>,
    next: AtomicU32,
}

impl PathInterner {
    /// Creates an empty interner.
    pub fn new() -> Self {
        PathInterner {
            table: DashMap::new(),
            next: AtomicU32::new(1),
        }
    }

    /// Number of distinct paths seen so far.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// True if no path has been interned yet.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    fn normalize(path: &Path) -> String {
        let raw = path.to_string_lossy();
        let trimmed = raw.trim_end_matches(['/', '\\']);
        let kept = if trimmed.is_empty() { &*raw } else { trimmed };
        if cfg!(windows) {
            kept.to_lowercase()
        } else {
            kept.to_string()
        }
    }
}

impl Default for PathInterner {
    fn default() -> Self {
        Self::new()
    }
}

impl PathIdentity for PathInterner {
    fn identity_of(&self, path: &Path) -> PathId {
        let key = Self::normalize(path);
        if let Some(existing) = self.table.get(&key) {
            return *existing;
        }
        let id = PathId::new(self.next.fetch_add(1, Ordering::Relaxed));
        *self.table.entry(key).or_insert(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_same_path_same_id() {
        let interner = PathInterner::new();
        let a = interner.identity_of(Path::new("/tmp/project/main.c"));
        let b = interner.identity_of(Path::new("/tmp/project/main.c"));
        assert_eq!(a, b);
    }

    #[test]
    fn test_distinct_paths_distinct_ids() {
        let interner = PathInterner::new();
        let a = interner.identity_of(Path::new("/tmp/a"));
        let b = interner.identity_of(Path::new("/tmp/b"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_trailing_separator_ignored() {
        let interner = PathInterner::new();
        let a = interner.identity_of(Path::new("/tmp/project"));
        let b = interner.identity_of(Path::new("/tmp/project/"));
        assert_eq!(a, b);
    }

    #[test]
    fn test_root_path_survives_trim() {
        let interner = PathInterner::new();
        let a = interner.identity_of(Path::new("/"));
        let b = interner.identity_of(Path::new("/"));
        assert_eq!(a, b);
    }

    #[test]
    fn test_len_tracks_interned_paths() {
        let interner = PathInterner::new();
        assert!(interner.is_empty());
        for i in 0..10 {
            interner.identity_of(&PathBuf::from(format!("/tmp/f{i}")));
        }
        assert_eq!(interner.len(), 10);
    }

    #[test]
    fn test_concurrent_interning_agrees() {
        use std::sync::Arc;
        let interner = Arc::new(PathInterner::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let interner = Arc::clone(&interner);
            handles.push(std::thread::spawn(move || {
                interner.identity_of(Path::new("/tmp/shared"))
            }));
        }
        let ids: Vec<PathId> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
    }
}
