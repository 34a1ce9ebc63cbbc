//! The call surface the virtual-filesystem layer talks to.
//!
//! The original mechanism piggybacked on an ambient runtime hook that saw
//! every file access. Here interception is explicit: the VFS layer calls
//! [`FsObserver::about_to_read`] / [`about_to_write`](FsObserver::about_to_write)
//! / [`about_to_delete`](FsObserver::about_to_delete) right before performing
//! the real I/O, and queries come back through
//! [`exists`](FsObserver::exists), [`distrust`](FsObserver::distrust) and
//! [`attributes`](FsObserver::attributes).

use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, OnceLock};

use tracing::trace;

use crate::attrs::PathAttributes;
use crate::error::Result;
use crate::hints::{ExistenceHintCache, READ_WEIGHT};
use crate::ident::{PathIdentity, PathInterner};
use crate::probe::{DiskProbe, PathProbe};
use crate::throttle::{IdleSession, LoadThrottle};

/// Entry point tying together the hint cache, the throttle, and the
/// per-lookup attribute view.
pub struct FsObserver {
    cache: Arc<ExistenceHintCache>,
}

impl FsObserver {
    /// Builds an observer over the given identity allocator and raw probe,
    /// with a fresh throttle and production cache thresholds.
    pub fn new(identity: Arc<dyn PathIdentity>, probe: Arc<dyn PathProbe>) -> Self {
        let throttle = Arc::new(LoadThrottle::new());
        FsObserver {
            cache: Arc::new(ExistenceHintCache::new(identity, probe, throttle)),
        }
    }

    /// Builds an observer around an existing cache (tests, custom wiring).
    pub fn with_cache(cache: Arc<ExistenceHintCache>) -> Self {
        FsObserver { cache }
    }

    /// The process-wide observer, wired to the real disk and a shared path
    /// interner. Initialized on first use.
    pub fn global() -> &'static FsObserver {
        static GLOBAL: OnceLock<FsObserver> = OnceLock::new();
        GLOBAL.get_or_init(|| {
            FsObserver::new(Arc::new(PathInterner::new()), Arc::new(DiskProbe))
        })
    }

    /// The underlying hint cache.
    pub fn cache(&self) -> &ExistenceHintCache {
        &self.cache
    }

    /// The underlying throttle.
    pub fn throttle(&self) -> &Arc<LoadThrottle> {
        self.cache.throttle()
    }

    /// A read of `path` is about to happen. Feeds the load meter only; reads
    /// carry no existence information worth hinting.
    pub fn about_to_read(&self, path: &Path, idle: Option<&IdleSession>) -> Result<()> {
        trace!(path = %path.display(), "observed read");
        self.cache.throttle().ping(READ_WEIGHT, idle)?;
        Ok(())
    }

    /// A write (create-or-truncate) of `path` is about to happen.
    pub fn about_to_write(&self, path: &Path, idle: Option<&IdleSession>) -> Result<()> {
        trace!(path = %path.display(), "observed write");
        self.cache.record(path, true, idle)
    }

    /// A deletion of `path` is about to happen.
    pub fn about_to_delete(&self, path: &Path, idle: Option<&IdleSession>) -> Result<()> {
        trace!(path = %path.display(), "observed delete");
        self.cache.record(path, false, idle)
    }

    /// Ground-truth existence, republished as a fresh hint.
    pub fn exists(&self, path: &Path, idle: Option<&IdleSession>) -> Result<bool> {
        self.cache.probe(path, idle)
    }

    /// Consumes the hint for `path`: should a caller that assumed
    /// `assumed_exists` re-check the real filesystem?
    pub fn distrust(&self, path: &Path, assumed_exists: bool) -> bool {
        self.cache.take_hint_consistency(path, assumed_exists)
    }

    /// A memoized attribute view of `path` for one logical lookup.
    pub fn attributes(&self, path: impl Into<std::path::PathBuf>) -> PathAttributes<'_> {
        PathAttributes::new(&self.cache, path)
    }

    /// Runs `body` as a throttleable background scan: pings from inside
    /// `body` (through the session handle) block while the load is at or
    /// above `max_load`.
    pub fn enter_idle<'a, R>(
        &self,
        max_load: u32,
        on_sleep: Option<&'a (dyn Fn() + Sync)>,
        cancel: Option<&'a AtomicBool>,
        body: impl FnOnce(&IdleSession<'a>) -> R,
    ) -> R {
        self.cache
            .throttle()
            .with_idle_session(max_load, on_sleep, cancel, None, body)
    }

    /// Runs `body` as a priority operation that throttled waiters must not
    /// delay.
    pub fn run_priority<R>(&self, body: impl FnOnce() -> R) -> R {
        self.cache.throttle().with_priority(body)
    }

    /// Runs one urgent, unthrottleable action from inside a throttled scan.
    pub fn run_now_ignoring_idle<R>(
        &self,
        session: Option<&IdleSession>,
        body: impl FnOnce() -> R,
    ) -> Result<R> {
        self.cache.throttle().run_now_ignoring_idle(session, body)
    }
}
