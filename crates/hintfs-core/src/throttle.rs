//! Decaying I/O load meter with cooperative backpressure.
//!
//! Every observed I/O event pings the meter. The load halves once per 100 ms
//! bucket of wall-clock time, so the counter approximates recent call volume
//! rather than a lifetime total. Background scanners opt in to throttling by
//! running inside an [`IdleSession`]: their pings block until the load drops
//! below the session's threshold, so interactive I/O always wins.
//!
//! The meter mutex guards two small integers and is never held across a
//! callback or a probe.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, TryLockError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{HintError, Result};

/// Width of one decay bucket and the bounded-wait granularity.
pub const DECAY_BUCKET_MS: u64 = 100;

#[derive(Debug)]
struct Meter {
    /// Estimated recent I/O call volume.
    load: u32,
    /// Last decay timestamp, in `DECAY_BUCKET_MS` buckets.
    bucket: u64,
}

/// Counters describing throttle activity. Observational only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThrottleStats {
    /// Times a waiter entered the bounded-sleep loop.
    pub waits: u64,
    /// Waits aborted by a session's cancellation flag.
    pub interrupts: u64,
    /// Waits ended early by the bail-out predicate or a contended meter.
    pub early_returns: u64,
}

#[derive(Default)]
struct StatCounters {
    waits: AtomicU64,
    interrupts: AtomicU64,
    early_returns: AtomicU64,
}

/// A background worker's opt-in to being throttled.
///
/// Sessions are explicit handles threaded through call sites rather than
/// ambient thread-local state, so the wait logic is testable without real
/// threads. Nesting happens structurally: a nested session is created with
/// [`LoadThrottle::with_idle_session`] passing the enclosing session as
/// `parent`, and the previous session is "restored" simply by the inner
/// scope ending.
pub struct IdleSession<'a> {
    max_load: u32,
    on_sleep: Option<&'a (dyn Fn() + Sync)>,
    cancel: Option<&'a AtomicBool>,
}

impl IdleSession<'_> {
    /// The load threshold this session waits below.
    pub fn max_load(&self) -> u32 {
        self.max_load
    }

    fn cancelled(&self) -> bool {
        self.cancel.map(|c| c.load(Ordering::SeqCst)).unwrap_or(false)
    }

    fn fire_on_sleep(&self) {
        if let Some(cb) = self.on_sleep {
            cb();
        }
    }
}

/// RAII marker for a short critical operation that throttled waiters must
/// not delay. Waiters re-check on drop.
pub struct PriorityGuard<'a> {
    throttle: &'a LoadThrottle,
}

impl Drop for PriorityGuard<'_> {
    fn drop(&mut self) {
        self.throttle.priority.fetch_sub(1, Ordering::SeqCst);
        self.throttle.changed.notify_all();
    }
}

/// Process-wide decaying load meter and idle/priority coordination.
pub struct LoadThrottle {
    meter: Mutex<Meter>,
    changed: Condvar,
    priority: AtomicU32,
    bail_out: Option<Box<dyn Fn() -> bool + Send + Sync>>,
    start: Instant,
    stats: StatCounters,
}

impl Default for LoadThrottle {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadThrottle {
    /// Creates an idle meter.
    pub fn new() -> Self {
        LoadThrottle {
            meter: Mutex::new(Meter { load: 0, bucket: 0 }),
            changed: Condvar::new(),
            priority: AtomicU32::new(0),
            bail_out: None,
            start: Instant::now(),
            stats: StatCounters::default(),
        }
    }

    /// Installs the host's reentrancy escape hatch: a predicate consulted on
    /// the first iteration of a wait. Returning true releases the waiter
    /// immediately. Hosts whose runtime can re-enter the filesystem while
    /// resolving code plug their detection in here.
    pub fn with_bail_out(mut self, predicate: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        self.bail_out = Some(Box::new(predicate));
        self
    }

    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    /// Decays `meter` up to `now_bucket`. Returns true if the load changed.
    fn decay(meter: &mut Meter, now_bucket: u64) -> bool {
        let before = meter.load;
        while meter.bucket < now_bucket {
            meter.load >>= 1;
            if meter.load == 0 {
                // Idle short-circuit: snap forward so the next ping does not
                // replay empty buckets.
                meter.bucket = now_bucket + 1;
                break;
            }
            meter.bucket += 1;
        }
        before != meter.load
    }

    fn lock_meter(&self) -> std::sync::MutexGuard<'_, Meter> {
        // The meter is two integers; a poisoned lock still holds usable data.
        self.meter.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Reports an I/O event of the given weight and returns the current load.
    ///
    /// `weight == 0` is a read-only probe: the load is decayed and returned
    /// but nothing is added. A caller inside an [`IdleSession`] does not add
    /// load at all; it blocks until the load falls below the session's
    /// threshold instead.
    pub fn ping(&self, weight: u32, idle: Option<&IdleSession>) -> Result<u32> {
        self.ping_at(weight, self.now_ms(), idle)
    }

    /// [`ping`](Self::ping) against an explicit clock, for deterministic
    /// decay tests.
    pub fn ping_at(&self, weight: u32, now_ms: u64, idle: Option<&IdleSession>) -> Result<u32> {
        let now_bucket = now_ms / DECAY_BUCKET_MS;
        let mut meter = self.lock_meter();
        if Self::decay(&mut meter, now_bucket) {
            self.changed.notify_all();
        }
        if weight == 0 {
            return Ok(meter.load);
        }
        match idle {
            None => {
                meter.load = meter.load.saturating_add(weight);
                Ok(meter.load)
            }
            Some(session) => {
                // Idle callers yield instead of adding load.
                drop(meter);
                self.wait_until_below(session.max_load(), Some(session))?;
                let mut meter = self.lock_meter();
                Self::decay(&mut meter, self.now_ms() / DECAY_BUCKET_MS);
                Ok(meter.load)
            }
        }
    }

    /// Current decayed load, without side effects.
    pub fn current_load(&self) -> u32 {
        // Read-only ping cannot be interrupted.
        self.ping(0, None).unwrap_or(0)
    }

    /// Number of in-flight priority operations.
    pub fn priority_count(&self) -> u32 {
        self.priority.load(Ordering::SeqCst)
    }

    /// Blocks until the decayed load drops below `threshold` and no priority
    /// operation is in flight. A threshold of 0 waits for full idle.
    ///
    /// Returns [`HintError::WaitInterrupted`] if the session's cancellation
    /// flag is raised. Two liveness escapes return early without waiting:
    /// the injectable bail-out predicate (first iteration only) and a meter
    /// lock held by another owner. Both trade throttling strictness for
    /// never deadlocking; the second is a known, deliberate race.
    pub fn wait_until_below(&self, threshold: u32, session: Option<&IdleSession>) -> Result<()> {
        // `threshold == 0` means "wait until fully idle", so the effective
        // comparison floor is 1.
        let release_below = threshold.max(1);
        let mut first = true;
        loop {
            if let Some(s) = session {
                if s.cancelled() {
                    self.stats.interrupts.fetch_add(1, Ordering::Relaxed);
                    return Err(HintError::WaitInterrupted);
                }
            }
            let mut meter = match self.meter.try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::Poisoned(p)) => p.into_inner(),
                Err(TryLockError::WouldBlock) => {
                    // Someone else owns the meter; waiting here can invert
                    // lock order with the owner. Let the caller proceed.
                    self.stats.early_returns.fetch_add(1, Ordering::Relaxed);
                    return Ok(());
                }
            };
            if Self::decay(&mut meter, self.now_ms() / DECAY_BUCKET_MS) {
                self.changed.notify_all();
            }
            if meter.load < release_below && self.priority.load(Ordering::SeqCst) == 0 {
                return Ok(());
            }
            if first {
                first = false;
                if let Some(bail) = &self.bail_out {
                    if bail() {
                        self.stats.early_returns.fetch_add(1, Ordering::Relaxed);
                        return Ok(());
                    }
                }
            }
            trace!(load = meter.load, threshold, "idle wait: load too high");
            self.stats.waits.fetch_add(1, Ordering::Relaxed);
            // The about-to-sleep callback may call back into the throttle;
            // the meter must not be held across it.
            drop(meter);
            if let Some(s) = session {
                s.fire_on_sleep();
            }
            let meter = match self.meter.try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::Poisoned(p)) => p.into_inner(),
                Err(TryLockError::WouldBlock) => {
                    self.stats.early_returns.fetch_add(1, Ordering::Relaxed);
                    return Ok(());
                }
            };
            let (guard, _) = self
                .changed
                .wait_timeout(meter, Duration::from_millis(DECAY_BUCKET_MS))
                .unwrap_or_else(|e| e.into_inner());
            drop(guard);
        }
    }

    /// Runs `body` as a priority operation: throttled waiters stay blocked
    /// until it finishes, even if the load is low. The counter is restored
    /// on unwind.
    pub fn with_priority<R>(&self, body: impl FnOnce() -> R) -> R {
        let _guard = self.priority_guard();
        body()
    }

    /// Raw guard form of [`with_priority`](Self::with_priority).
    pub fn priority_guard(&self) -> PriorityGuard<'_> {
        self.priority.fetch_add(1, Ordering::SeqCst);
        PriorityGuard { throttle: self }
    }

    /// Runs `body` inside an idle session with the given threshold,
    /// about-to-sleep callback, and cancellation flag. When `parent` is an
    /// enclosing session the thresholds merge by maximum, so a nested scope
    /// can loosen but never tighten the throttle already in force.
    pub fn with_idle_session<'a, R>(
        &self,
        max_load: u32,
        on_sleep: Option<&'a (dyn Fn() + Sync)>,
        cancel: Option<&'a AtomicBool>,
        parent: Option<&IdleSession<'_>>,
        body: impl FnOnce(&IdleSession<'a>) -> R,
    ) -> R {
        let merged = match parent {
            Some(p) => p.max_load.max(max_load),
            None => max_load,
        };
        let session = IdleSession {
            max_load: merged,
            on_sleep,
            cancel,
        };
        body(&session)
    }

    /// Runs one urgent action from inside a throttled scan without idle
    /// semantics. With an active session, first waits for the load to drop
    /// below the session's threshold (honoring cancellation), then runs
    /// `body` unthrottled; re-entering the wait loop from inside `body`
    /// through its own session handle is what used to deadlock, so `body`
    /// gets no session. Without a session this is just `body()`.
    pub fn run_now_ignoring_idle<R>(
        &self,
        session: Option<&IdleSession>,
        body: impl FnOnce() -> R,
    ) -> Result<R> {
        if let Some(s) = session {
            self.wait_until_below(s.max_load(), Some(s))?;
        }
        Ok(body())
    }

    /// Snapshot of the throttle counters.
    pub fn stats(&self) -> ThrottleStats {
        ThrottleStats {
            waits: self.stats.waits.load(Ordering::Relaxed),
            interrupts: self.stats.interrupts.load(Ordering::Relaxed),
            early_returns: self.stats.early_returns.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ping_accumulates_weight() {
        let throttle = LoadThrottle::new();
        assert_eq!(throttle.ping_at(2, 0, None).unwrap(), 2);
        assert_eq!(throttle.ping_at(1, 0, None).unwrap(), 3);
    }

    #[test]
    fn test_zero_weight_is_read_only() {
        let throttle = LoadThrottle::new();
        throttle.ping_at(4, 0, None).unwrap();
        assert_eq!(throttle.ping_at(0, 0, None).unwrap(), 4);
        assert_eq!(throttle.ping_at(0, 0, None).unwrap(), 4);
    }

    #[test]
    fn test_load_halves_per_bucket() {
        let throttle = LoadThrottle::new();
        throttle.ping_at(8, 0, None).unwrap();
        assert_eq!(throttle.ping_at(0, 100, None).unwrap(), 4);
        assert_eq!(throttle.ping_at(0, 200, None).unwrap(), 2);
    }

    #[test]
    fn test_load_reaches_zero_after_decay() {
        let throttle = LoadThrottle::new();
        throttle.ping_at(8, 0, None).unwrap();
        assert_eq!(throttle.ping_at(0, 400, None).unwrap(), 0);
    }

    #[test]
    fn test_decay_skips_many_idle_buckets() {
        let throttle = LoadThrottle::new();
        throttle.ping_at(1_000_000, 0, None).unwrap();
        assert_eq!(throttle.ping_at(0, 1_000_000_000, None).unwrap(), 0);
    }

    #[test]
    fn test_bucket_snaps_forward_when_idle() {
        let throttle = LoadThrottle::new();
        throttle.ping_at(1, 0, None).unwrap();
        // Decays to zero in the first elapsed bucket.
        assert_eq!(throttle.ping_at(0, 100, None).unwrap(), 0);
        // The snapped-forward clock must not double-decay new load.
        assert_eq!(throttle.ping_at(6, 150, None).unwrap(), 6);
        assert_eq!(throttle.ping_at(0, 199, None).unwrap(), 6);
    }

    #[test]
    fn test_wait_returns_when_already_idle() {
        let throttle = LoadThrottle::new();
        throttle.wait_until_below(0, None).unwrap();
    }

    #[test]
    fn test_wait_respects_threshold() {
        let throttle = LoadThrottle::new();
        throttle.ping_at(3, 0, None).unwrap();
        // Load 3 is below a threshold of 5; no sleep needed.
        throttle.wait_until_below(5, None).unwrap();
        assert_eq!(throttle.stats().waits, 0);
    }

    #[test]
    fn test_cancellation_interrupts_wait() {
        let throttle = LoadThrottle::new();
        throttle.ping(50, None).unwrap();
        let cancel = AtomicBool::new(true);
        throttle.with_idle_session(0, None, Some(&cancel), None, |session| {
            let err = throttle.wait_until_below(0, Some(session)).unwrap_err();
            assert!(matches!(err, HintError::WaitInterrupted));
        });
        assert_eq!(throttle.stats().interrupts, 1);
    }

    #[test]
    fn test_bail_out_releases_first_iteration() {
        let throttle = LoadThrottle::new().with_bail_out(|| true);
        throttle.ping(50, None).unwrap();
        // Load stays high but the predicate lets the waiter through.
        throttle.wait_until_below(0, None).unwrap();
        assert_eq!(throttle.stats().early_returns, 1);
    }

    #[test]
    fn test_priority_guard_restores_on_drop() {
        let throttle = LoadThrottle::new();
        {
            let _a = throttle.priority_guard();
            let _b = throttle.priority_guard();
            assert_eq!(throttle.priority_count(), 2);
        }
        assert_eq!(throttle.priority_count(), 0);
    }

    #[test]
    fn test_priority_guard_restores_on_panic() {
        let throttle = LoadThrottle::new();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            throttle.with_priority(|| panic!("boom"));
        }));
        assert!(result.is_err());
        assert_eq!(throttle.priority_count(), 0);
    }

    #[test]
    fn test_priority_blocks_waiter_even_when_idle() {
        let throttle = LoadThrottle::new();
        let _guard = throttle.priority_guard();
        let cancel = AtomicBool::new(false);
        let slept = AtomicBool::new(false);
        let on_sleep = || {
            slept.store(true, Ordering::SeqCst);
            cancel.store(true, Ordering::SeqCst);
        };
        throttle.with_idle_session(0, Some(&on_sleep), Some(&cancel), None, |session| {
            // Load is zero, but the priority op must keep the waiter asleep
            // until cancellation fires.
            let err = throttle.wait_until_below(0, Some(session)).unwrap_err();
            assert!(matches!(err, HintError::WaitInterrupted));
        });
        assert!(slept.load(Ordering::SeqCst));
    }

    #[test]
    fn test_on_sleep_callback_may_reenter_the_throttle() {
        let throttle = LoadThrottle::new();
        throttle.ping(6, None).unwrap();
        let observed = AtomicU32::new(u32::MAX);
        let on_sleep = || {
            // Reads the meter from inside the callback. This must not
            // self-deadlock the sleeping waiter.
            observed.store(throttle.current_load(), Ordering::SeqCst);
        };
        throttle.with_idle_session(0, Some(&on_sleep), None, None, |session| {
            let load = throttle.ping(2, Some(session)).unwrap();
            assert_eq!(load, 0);
        });
        assert_ne!(observed.load(Ordering::SeqCst), u32::MAX);
        // The meter stays usable afterwards.
        assert_eq!(throttle.ping(1, None).unwrap(), 1);
    }

    #[test]
    fn test_nested_sessions_merge_by_max() {
        let throttle = LoadThrottle::new();
        throttle.with_idle_session(3, None, None, None, |outer| {
            assert_eq!(outer.max_load(), 3);
            throttle.with_idle_session(7, None, None, Some(outer), |inner| {
                assert_eq!(inner.max_load(), 7);
            });
            throttle.with_idle_session(1, None, None, Some(outer), |inner| {
                // A nested scope cannot tighten the throttle in force.
                assert_eq!(inner.max_load(), 3);
            });
        });
    }

    #[test]
    fn test_idle_ping_waits_for_decay() {
        let throttle = LoadThrottle::new();
        throttle.ping(6, None).unwrap();

        let started = Instant::now();
        throttle.with_idle_session(0, None, None, None, |session| {
            // The waiter decays the meter itself on each wakeup; load 6
            // needs three buckets to reach zero.
            let load = throttle.ping(2, Some(session)).unwrap();
            assert_eq!(load, 0);
        });
        assert!(started.elapsed() >= Duration::from_millis(200));
        assert!(throttle.stats().waits >= 1);
    }

    #[test]
    fn test_run_now_ignoring_idle_without_session() {
        let throttle = LoadThrottle::new();
        let out = throttle.run_now_ignoring_idle(None, || 42).unwrap();
        assert_eq!(out, 42);
    }

    #[test]
    fn test_run_now_ignoring_idle_waits_first() {
        let throttle = LoadThrottle::new();
        throttle.ping(4, None).unwrap();
        throttle.with_idle_session(8, None, None, None, |session| {
            // Load 4 is already below the session threshold; runs at once.
            let out = throttle.run_now_ignoring_idle(Some(session), || "done").unwrap();
            assert_eq!(out, "done");
        });
    }

    #[test]
    fn test_run_now_ignoring_idle_honors_cancel() {
        let throttle = LoadThrottle::new();
        throttle.ping(50, None).unwrap();
        let cancel = AtomicBool::new(true);
        throttle.with_idle_session(0, None, Some(&cancel), None, |session| {
            let err = throttle
                .run_now_ignoring_idle(Some(session), || ())
                .unwrap_err();
            assert!(matches!(err, HintError::WaitInterrupted));
        });
    }
}
