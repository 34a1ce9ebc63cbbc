//! Per-lookup memoization of derived path attributes.
//!
//! One `PathAttributes` wraps one path for one logical lookup. Every
//! attribute is computed at most once; repeated reads return the first
//! observed value even if the disk changed underneath. The object is cheap,
//! short-lived, and never shared across threads.

use std::path::{Path, PathBuf};

use crate::hints::ExistenceHintCache;
use crate::ident::PathId;

/// Memoized attribute view of a single path.
pub struct PathAttributes<'a> {
    cache: &'a ExistenceHintCache,
    path: PathBuf,
    is_file: Option<bool>,
    is_dir: Option<bool>,
    exists: Option<bool>,
    is_compute_node: Option<bool>,
    is_unix_special: Option<bool>,
    is_unc_folder: Option<bool>,
    is_convertible: Option<bool>,
    root: Option<PathBuf>,
    id: Option<PathId>,
}

impl<'a> PathAttributes<'a> {
    /// Wraps `path` for one lookup against `cache`.
    pub fn new(cache: &'a ExistenceHintCache, path: impl Into<PathBuf>) -> Self {
        PathAttributes {
            cache,
            path: path.into(),
            is_file: None,
            is_dir: None,
            exists: None,
            is_compute_node: None,
            is_unix_special: None,
            is_unc_folder: None,
            is_convertible: None,
            root: None,
            id: None,
        }
    }

    /// The wrapped path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Is the path a regular file? First read asks the probe.
    pub fn is_file(&mut self) -> bool {
        if let Some(v) = self.is_file {
            return v;
        }
        let v = self.cache.raw_probe().is_file(&self.path);
        self.is_file = Some(v);
        v
    }

    /// Is the path a directory? First read asks the probe.
    pub fn is_directory(&mut self) -> bool {
        if let Some(v) = self.is_dir {
            return v;
        }
        let v = self.cache.raw_probe().is_dir(&self.path);
        self.is_dir = Some(v);
        v
    }

    /// Does the path exist? The only attribute that feeds the load meter:
    /// ground truth comes from the hint cache's probe, which republishes the
    /// observed state as a fresh hint.
    pub fn exists(&mut self) -> bool {
        if let Some(v) = self.exists {
            return v;
        }
        let v = self.cache.probe(&self.path, None).unwrap_or(false);
        self.exists = Some(v);
        v
    }

    /// Windows only: is the path a reachable UNC host root? Always false
    /// elsewhere.
    pub fn is_compute_node(&mut self) -> bool {
        if let Some(v) = self.is_compute_node {
            return v;
        }
        let v = self.cache.raw_probe().is_compute_node(&self.path);
        self.is_compute_node = Some(v);
        v
    }

    /// Non-Windows: a path that exists but is neither file nor directory
    /// (device, socket, fifo).
    pub fn is_unix_special_file(&mut self) -> bool {
        if let Some(v) = self.is_unix_special {
            return v;
        }
        let v = self.exists() && !self.is_file() && !self.is_directory();
        self.is_unix_special = Some(v);
        v
    }

    /// Windows: a UNC share folder that the host reports reachable but stat
    /// calls cannot see directly.
    pub fn is_unc_folder(&mut self) -> bool {
        if let Some(v) = self.is_unc_folder {
            return v;
        }
        let v =
            self.is_compute_node() && !self.is_file() && !self.is_directory() && !self.exists();
        self.is_unc_folder = Some(v);
        v
    }

    /// Can the path be represented as a watched filesystem handle?
    pub fn is_convertible(&mut self) -> bool {
        if let Some(v) = self.is_convertible {
            return v;
        }
        let v = self.cache.raw_probe().is_convertible(&self.path);
        self.is_convertible = Some(v);
        v
    }

    /// The path's stable identity, resolved lazily.
    pub fn id(&mut self) -> PathId {
        if let Some(v) = self.id {
            return v;
        }
        let v = self.cache.identity_allocator().identity_of(&self.path);
        self.id = Some(v);
        v
    }

    /// Top-most ancestor of the path.
    ///
    /// On a UNC path whose top-most ancestor renders as a bare `\\` prefix,
    /// the root is re-derived as `\\host\share`; if the path has no share
    /// component the path itself is the root.
    pub fn root(&mut self) -> &Path {
        if self.root.is_none() {
            let top = self
                .path
                .ancestors()
                .last()
                .unwrap_or(&self.path)
                .to_path_buf();
            self.root = Some(resolve_root(&self.path, &top));
        }
        self.root.as_deref().unwrap_or(&self.path)
    }
}

/// Resolution step of [`PathAttributes::root`], split from the ancestor walk
/// so the bare-`\\` case is reachable on hosts whose path parser never
/// yields it.
fn resolve_root(path: &Path, top: &Path) -> PathBuf {
    if is_bare_unc_prefix(&top.to_string_lossy()) {
        match unc_share_root(&path.to_string_lossy()) {
            Some(share) => PathBuf::from(share),
            None => path.to_path_buf(),
        }
    } else {
        top.to_path_buf()
    }
}

fn is_sep(c: char) -> bool {
    c == '\\' || c == '/'
}

fn is_bare_unc_prefix(s: &str) -> bool {
    s.len() == 2 && s.chars().all(is_sep)
}

/// `\\host\share\...` -> `\\host\share`. None when the path has no share
/// separator after the host.
fn unc_share_root(abs: &str) -> Option<String> {
    if abs.len() < 3 {
        return None;
    }
    let tail = &abs[2..];
    let host_end = tail.find(is_sep)?;
    let after_host = &tail[host_end + 1..];
    let share_len = after_host.find(is_sep).unwrap_or(after_host.len());
    if after_host.is_empty() {
        return None;
    }
    Some(abs[..2 + host_end + 1 + share_len].to_string())
}
