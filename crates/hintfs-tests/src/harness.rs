//! Shared fixtures: a scriptable in-memory disk and an observer builder.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use hintfs_core::hints::{ExistenceHintCache, HintCacheConfig};
use hintfs_core::ident::PathInterner;
use hintfs_core::probe::PathProbe;
use hintfs_core::throttle::LoadThrottle;
use hintfs_core::vfs::FsObserver;

/// Per-path answers the scripted disk hands out.
#[derive(Debug, Clone, Copy, Default)]
pub struct PathState {
    /// Whether the path exists.
    pub exists: bool,
    /// Whether the path is a regular file.
    pub is_file: bool,
    /// Whether the path is a directory.
    pub is_dir: bool,
}

/// An in-memory "disk" whose contents tests mutate mid-flight.
///
/// Unknown paths do not exist. Thread-safe so probe calls from worker
/// threads race with test-driven mutations, which is the point.
#[derive(Default)]
pub struct ScriptedDisk {
    paths: Mutex<HashMap<PathBuf, PathState>>,
}

impl ScriptedDisk {
    /// Creates an empty disk.
    pub fn new() -> Self {
        Self::default()
    }

    /// Puts a regular file at `path`.
    pub fn add_file(&self, path: impl Into<PathBuf>) {
        self.paths.lock().unwrap().insert(
            path.into(),
            PathState {
                exists: true,
                is_file: true,
                is_dir: false,
            },
        );
    }

    /// Puts a directory at `path`.
    pub fn add_dir(&self, path: impl Into<PathBuf>) {
        self.paths.lock().unwrap().insert(
            path.into(),
            PathState {
                exists: true,
                is_file: false,
                is_dir: true,
            },
        );
    }

    /// Removes whatever is at `path`.
    pub fn remove(&self, path: &Path) {
        self.paths.lock().unwrap().remove(path);
    }

    fn state(&self, path: &Path) -> PathState {
        self.paths
            .lock()
            .unwrap()
            .get(path)
            .copied()
            .unwrap_or_default()
    }
}

impl PathProbe for ScriptedDisk {
    fn exists(&self, path: &Path) -> bool {
        self.state(path).exists
    }

    fn is_file(&self, path: &Path) -> bool {
        self.state(path).is_file
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.state(path).is_dir
    }

    fn is_compute_node(&self, _path: &Path) -> bool {
        false
    }
}

/// One observer over one scripted disk, with optional cache thresholds.
pub struct TestEnv {
    /// The scripted disk backing the observer's probe.
    pub disk: Arc<ScriptedDisk>,
    /// The observer under test.
    pub observer: Arc<FsObserver>,
}

impl TestEnv {
    /// Environment with production cache thresholds.
    pub fn new() -> Self {
        Self::with_config(HintCacheConfig::default())
    }

    /// Environment with explicit cache thresholds.
    pub fn with_config(config: HintCacheConfig) -> Self {
        init_tracing();
        let disk = Arc::new(ScriptedDisk::new());
        let cache = ExistenceHintCache::with_config(
            Arc::new(PathInterner::new()),
            Arc::clone(&disk) as Arc<dyn PathProbe>,
            Arc::new(LoadThrottle::new()),
            config,
        );
        TestEnv {
            disk,
            observer: Arc::new(FsObserver::with_cache(Arc::new(cache))),
        }
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

fn init_tracing() {
    static INIT: OnceLock<()> = OnceLock::new();
    INIT.get_or_init(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_disk_roundtrip() {
        let disk = ScriptedDisk::new();
        disk.add_file("/a/b.c");
        assert!(disk.exists(Path::new("/a/b.c")));
        assert!(disk.is_file(Path::new("/a/b.c")));
        disk.remove(Path::new("/a/b.c"));
        assert!(!disk.exists(Path::new("/a/b.c")));
    }

    #[test]
    fn test_env_wires_disk_to_observer() {
        let env = TestEnv::new();
        env.disk.add_file("/proj/main.c");
        assert!(env.observer.exists(Path::new("/proj/main.c"), None).unwrap());
        assert!(!env.observer.exists(Path::new("/proj/gone.c"), None).unwrap());
    }
}
