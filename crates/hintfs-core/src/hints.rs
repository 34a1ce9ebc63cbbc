//! Existence hints: advisory "this path was just created/deleted" records.
//!
//! Hints are written when the virtual-filesystem layer reports a mutating
//! operation and consumed when someone asks whether a previously assumed
//! existence state should be distrusted. The table is a pure optimization:
//! any entry (or the whole table) can vanish at any moment and callers fall
//! back to the real probe.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::Result;
use crate::ident::{PathId, PathIdentity};
use crate::probe::PathProbe;
use crate::throttle::{IdleSession, LoadThrottle};

/// Meter weight of one observed mutating operation.
pub const RECORD_WEIGHT: u32 = 2;
/// Meter weight of one ground-truth probe.
pub const PROBE_WEIGHT: u32 = 1;
/// Meter weight of one observed plain read.
pub const READ_WEIGHT: u32 = 1;

/// Advisory belief about a path's current existence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Hint {
    /// A creating operation was observed; the path should exist.
    Created,
    /// A deleting operation was observed; the path should be gone.
    Deleted,
    /// Two conflicting observations raced. Absorbing until removed.
    Ambiguous,
}

impl Hint {
    fn of(created: bool) -> Hint {
        if created {
            Hint::Created
        } else {
            Hint::Deleted
        }
    }

    /// Merge of an existing hint with a newly observed one. Agreement keeps
    /// the hint; disagreement collapses to `Ambiguous`, which never recovers.
    fn merge(self, incoming: Hint) -> Hint {
        if self == incoming {
            self
        } else {
            Hint::Ambiguous
        }
    }

    /// The existence this hint implies, or `None` for `Ambiguous`.
    pub fn implied_exists(&self) -> Option<bool> {
        match self {
            Hint::Created => Some(true),
            Hint::Deleted => Some(false),
            Hint::Ambiguous => None,
        }
    }
}

/// Shrink thresholds for the hint table. Defaults are the production values;
/// tests shrink them to keep table sizes small.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HintCacheConfig {
    /// Pre-insert full clear at this many entries.
    pub max_entries: usize,
    /// Cooldown-based clear only fires above this many entries.
    pub cooldown_entries: usize,
    /// Cooldown window between shrink checks on the removal path.
    pub cooldown_ms: u64,
}

impl Default for HintCacheConfig {
    fn default() -> Self {
        HintCacheConfig {
            max_entries: 150_000,
            cooldown_entries: 1_500,
            cooldown_ms: 5_000,
        }
    }
}

/// Hint table counters. Observational only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HintCacheStats {
    /// Hints consumed with a useful (non-absent) answer.
    pub hits: u64,
    /// Consumption attempts that found no hint.
    pub misses: u64,
    /// Full clears triggered by the size high-water mark.
    pub shrinks_by_size: u64,
    /// Full clears triggered by the cooldown policy.
    pub shrinks_by_cooldown: u64,
    /// Live entries at snapshot time.
    pub entries: usize,
}

#[derive(Default)]
struct StatCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    shrinks_by_size: AtomicU64,
    shrinks_by_cooldown: AtomicU64,
}

/// Process-wide cache of existence hints keyed by path identity.
///
/// Owns the load throttle: every recorded operation and every probe feeds
/// the meter, so background scanners throttling on the meter see the cache's
/// traffic too.
pub struct ExistenceHintCache {
    identity: Arc<dyn PathIdentity>,
    probe: Arc<dyn PathProbe>,
    throttle: Arc<LoadThrottle>,
    table: DashMap<PathId, Hint>,
    config: HintCacheConfig,
    /// Milliseconds since `epoch` of the last shrink check / touch.
    last_check_ms: AtomicU64,
    epoch: Instant,
    stats: StatCounters,
}

impl ExistenceHintCache {
    /// Creates a cache over the given identity allocator, raw probe, and
    /// throttle, with production shrink thresholds.
    pub fn new(
        identity: Arc<dyn PathIdentity>,
        probe: Arc<dyn PathProbe>,
        throttle: Arc<LoadThrottle>,
    ) -> Self {
        Self::with_config(identity, probe, throttle, HintCacheConfig::default())
    }

    /// Creates a cache with explicit shrink thresholds.
    pub fn with_config(
        identity: Arc<dyn PathIdentity>,
        probe: Arc<dyn PathProbe>,
        throttle: Arc<LoadThrottle>,
        config: HintCacheConfig,
    ) -> Self {
        ExistenceHintCache {
            identity,
            probe,
            throttle,
            table: DashMap::new(),
            config,
            last_check_ms: AtomicU64::new(0),
            epoch: Instant::now(),
            stats: StatCounters::default(),
        }
    }

    /// The throttle this cache feeds.
    pub fn throttle(&self) -> &Arc<LoadThrottle> {
        &self.throttle
    }

    pub(crate) fn raw_probe(&self) -> &Arc<dyn PathProbe> {
        &self.probe
    }

    pub(crate) fn identity_allocator(&self) -> &Arc<dyn PathIdentity> {
        &self.identity
    }

    /// Number of live hints.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// True when no hints are live.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Records an observed mutating operation on `path`.
    ///
    /// Feeds the meter with weight [`RECORD_WEIGHT`]; an idle caller blocks
    /// on the meter instead (the only way this returns an error, via
    /// cancellation). The hint merges with any existing one per the
    /// `Ambiguous` policy.
    pub fn record(&self, path: &Path, created: bool, idle: Option<&IdleSession>) -> Result<()> {
        self.throttle.ping(RECORD_WEIGHT, idle)?;
        let id = self.identity.identity_of(path);
        self.insert_hint(id, Hint::of(created));
        Ok(())
    }

    fn insert_hint(&self, id: PathId, hint: Hint) {
        if self.table.len() >= self.config.max_entries {
            debug!(entries = self.table.len(), "hint table over high-water mark, clearing");
            self.table.clear();
            self.stats.shrinks_by_size.fetch_add(1, Ordering::Relaxed);
        }
        self.last_check_ms.store(self.now_ms(), Ordering::Relaxed);
        self.table
            .entry(id)
            .and_modify(|existing| *existing = existing.merge(hint))
            .or_insert(hint);
    }

    /// Cooldown shrink, run on every removal attempt. Resets the timer
    /// whether or not a clear happened.
    fn maybe_shrink_on_remove(&self) {
        let now = self.now_ms();
        let last = self.last_check_ms.load(Ordering::Relaxed);
        if now.saturating_sub(last) > self.config.cooldown_ms {
            if self.table.len() > self.config.cooldown_entries {
                debug!(entries = self.table.len(), "hint table cold and oversized, clearing");
                self.table.clear();
                self.stats.shrinks_by_cooldown.fetch_add(1, Ordering::Relaxed);
            }
            self.last_check_ms.store(now, Ordering::Relaxed);
        }
    }

    /// Ground-truth existence check.
    ///
    /// Feeds the meter with weight [`PROBE_WEIGHT`] (idle callers block
    /// instead), asks the raw probe, and republishes the observed truth as a
    /// fresh hint. Any prior hint for the path is dropped first so the
    /// probe's own side effect cannot manufacture `Ambiguous`.
    pub fn probe(&self, path: &Path, idle: Option<&IdleSession>) -> Result<bool> {
        self.throttle.ping(PROBE_WEIGHT, idle)?;
        let result = self.probe.exists(path);
        let id = self.identity.identity_of(path);
        self.maybe_shrink_on_remove();
        self.table.remove(&id);
        self.insert_hint(id, Hint::of(result));
        trace!(%id, exists = result, "probe republished hint");
        Ok(result)
    }

    /// Consumes the hint for `path` and reports whether a caller assuming
    /// `expected_exists` should distrust that assumption.
    ///
    /// No hint: false (nothing observed, nothing to distrust). `Ambiguous`:
    /// always true. Otherwise true iff the hint's implied existence differs
    /// from the assumption.
    pub fn take_hint_consistency(&self, path: &Path, expected_exists: bool) -> bool {
        let id = self.identity.identity_of(path);
        self.maybe_shrink_on_remove();
        match self.table.remove(&id) {
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                false
            }
            Some((_, hint)) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                match hint.implied_exists() {
                    None => true,
                    Some(implied) => implied != expected_exists,
                }
            }
        }
    }

    /// The live hint for `path`, if any. Does not consume it.
    pub fn peek(&self, path: &Path) -> Option<Hint> {
        let id = self.identity.identity_of(path);
        self.table.get(&id).map(|h| *h)
    }

    /// Drops every hint. Always safe: callers fall back to the real probe.
    pub fn clear(&self) {
        self.table.clear();
    }

    /// Snapshot of the cache counters.
    pub fn stats(&self) -> HintCacheStats {
        HintCacheStats {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            shrinks_by_size: self.stats.shrinks_by_size.load(Ordering::Relaxed),
            shrinks_by_cooldown: self.stats.shrinks_by_cooldown.load(Ordering::Relaxed),
            entries: self.table.len(),
        }
    }
}
