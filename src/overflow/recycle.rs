use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::warn;

use crate::overflow::{AcquireRequest, OverflowOutcome, OverflowStrategy, StrategyMetrics};
use crate::pool::{Lease, LeaseOrigin, PooledObject, PoolRegistry};
use crate::types::{Clock, Priority, ResourceKind};

/// Recycling only runs above this externally supplied stress level.
pub const STRESS_GATE: f64 = 0.8;

/// Forced recycling also requires this historical success rate,
/// unless the request is System priority.
const SUCCESS_RATE_GATE: f64 = 0.7;

/// Age bonus saturates here; an hour-old object is not more
/// recyclable than a five-minute-old one.
const AGE_BONUS_CAP_SECS: f64 = 300.0;

/// Penalty per recorded use; heavily used objects are likely to be
/// wanted again by their original call sites.
const USE_COUNT_PENALTY: f64 = 5.0;

/// Reward for objects whose holder flagged them idle.
const IDLE_BONUS: f64 = 50.0;

/// Forced reassignment of live objects under extreme stress.
///
/// Holders surrender objects they are done with but have not released
/// (long-lived scratch objects, parked streams); surrendered objects
/// stay tracked by id with their lifecycle metadata and form the
/// candidate set. When the gate conditions hold and no candidate
/// exists, the globally least-recently-used pooled object is forcibly
/// reclaimed instead: reused directly when the kind matches, or
/// dropped to free its memory with a fresh object constructed in its
/// place.
pub struct SmartRecycling {
    standby: Mutex<FxHashMap<u64, PooledObject>>,
    registry: Arc<PoolRegistry>,
    clock: Arc<dyn Clock>,
    attempts: AtomicU64,
    successes: AtomicU64,
    forced: AtomicU64,
}

impl SmartRecycling {
    pub fn new(registry: Arc<PoolRegistry>, clock: Arc<dyn Clock>) -> Self {
        Self {
            standby: Mutex::new(FxHashMap::default()),
            registry,
            clock,
            attempts: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            forced: AtomicU64::new(0),
        }
    }

    /// Park a surrendered object as a recycling candidate.
    pub(crate) fn park(&self, mut obj: PooledObject) {
        obj.mark_idle();
        self.standby.lock().insert(obj.id(), obj);
    }

    /// Surrendered objects currently parked.
    pub fn standby_len(&self) -> usize {
        self.standby.lock().len()
    }

    /// Fraction of accepted requests that produced an object.
    pub fn success_rate(&self) -> f64 {
        let attempts = self.attempts.load(Ordering::Relaxed);
        if attempts == 0 {
            return 0.0;
        }
        self.successes.load(Ordering::Relaxed) as f64 / attempts as f64
    }

    /// Recycling score: capped age bonus, use-count penalty, idle
    /// reward. Higher scores are better candidates.
    fn score(obj: &PooledObject, now: Instant) -> f64 {
        let age_bonus = obj.age(now).as_secs_f64().min(AGE_BONUS_CAP_SECS);
        let use_penalty = obj.use_count() as f64 * USE_COUNT_PENALTY;
        let idle_bonus = if obj.is_idle() { IDLE_BONUS } else { 0.0 };
        age_bonus - use_penalty + idle_bonus
    }

    /// Best-scoring parked candidate of the requested kind.
    fn take_candidate(&self, kind: ResourceKind, now: Instant) -> Option<PooledObject> {
        let mut standby = self.standby.lock();
        let best_id = standby
            .values()
            .filter(|obj| obj.kind() == kind && obj.recyclable())
            .max_by(|a, b| Self::score(a, now).total_cmp(&Self::score(b, now)))
            .map(PooledObject::id)?;
        standby.remove(&best_id)
    }

    /// Reset a reclaimed object and lease it out as recycled.
    fn reissue(&self, mut obj: PooledObject, now: Instant) -> Lease {
        obj.reset();
        obj.touch(now);
        self.registry.note_issued(obj.kind());
        self.successes.fetch_add(1, Ordering::Relaxed);
        Lease::new(
            obj,
            LeaseOrigin::Recycled,
            Arc::clone(&self.registry),
            None,
        )
    }

    pub fn clear(&self) {
        self.standby.lock().clear();
    }

    pub fn reset_counters(&self) {
        self.attempts.store(0, Ordering::Relaxed);
        self.successes.store(0, Ordering::Relaxed);
        self.forced.store(0, Ordering::Relaxed);
    }

    pub fn forced(&self) -> u64 {
        self.forced.load(Ordering::Relaxed)
    }
}

impl OverflowStrategy for SmartRecycling {
    fn name(&self) -> &'static str {
        "recycling"
    }

    fn can_handle(&self, _kind: ResourceKind, req: &AcquireRequest) -> bool {
        req.stress_level > STRESS_GATE
    }

    fn handle(&self, kind: ResourceKind, req: &AcquireRequest) -> Option<OverflowOutcome> {
        // The force gate uses the rate from before this attempt.
        let historical_rate = self.success_rate();
        self.attempts.fetch_add(1, Ordering::Relaxed);
        let now = self.clock.now();

        if let Some(obj) = self.take_candidate(kind, now) {
            return Some(OverflowOutcome::Provided(self.reissue(obj, now)));
        }

        let force = req.priority == Some(Priority::System) || historical_rate > SUCCESS_RATE_GATE;
        if !force {
            return None;
        }

        let lru = self.registry.take_global_lru()?;
        self.forced.fetch_add(1, Ordering::Relaxed);

        if lru.kind() == kind {
            warn!(kind = %kind, id = lru.id(), "force-recycling least-recently-used object");
            return Some(OverflowOutcome::Provided(self.reissue(lru, now)));
        }

        // Wrong kind: free its memory and construct the requested
        // kind in its place.
        warn!(
            evicted = %lru.kind(),
            requested = %kind,
            "force-recycling freed a cross-kind object"
        );
        drop(lru);
        let obj = self.registry.new_object(kind, &req.shape, None);
        self.registry.note_issued(kind);
        self.successes.fetch_add(1, Ordering::Relaxed);
        Some(OverflowOutcome::Provided(Lease::new(
            obj,
            LeaseOrigin::Recycled,
            Arc::clone(&self.registry),
            None,
        )))
    }

    fn metrics(&self) -> StrategyMetrics {
        StrategyMetrics {
            name: self.name(),
            attempts: self.attempts.load(Ordering::Relaxed),
            fulfilled: self.successes.load(Ordering::Relaxed),
            detail: vec![
                ("standby", self.standby_len() as f64),
                ("forced", self.forced() as f64),
                ("success_rate", self.success_rate()),
            ],
        }
    }
}
