use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::capacity::{CapacityEstimator, ShapeHint};
use crate::memory::{MemoryPressureMonitor, PoolSizeTable};
use crate::metrics::PoolTotals;
use crate::pool::kind_pool::{KindPool, PoolAcquire, PoolStatsSnapshot};
use crate::pool::object::PooledObject;
use crate::types::{Clock, Resource, ResourceKind};

/// Owns one pool per resource kind.
///
/// An explicit value created by the coordinator and torn down with it;
/// pool ceilings are re-derived from the pressure monitor on every
/// checkout, so tier changes take effect without a resize pass.
pub struct PoolRegistry {
    pools: [KindPool; 4],
    nominal_max: usize,
    default_ttl: Option<Duration>,
    next_id: AtomicU64,
    estimator: CapacityEstimator,
    monitor: Arc<MemoryPressureMonitor>,
    clock: Arc<dyn Clock>,
}

impl PoolRegistry {
    pub fn new(
        nominal_max: usize,
        default_ttl: Option<Duration>,
        estimator: CapacityEstimator,
        monitor: Arc<MemoryPressureMonitor>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            pools: [
                KindPool::new(ResourceKind::Message),
                KindPool::new(ResourceKind::Uri),
                KindPool::new(ResourceKind::Stream),
                KindPool::new(ResourceKind::Buffer),
            ],
            nominal_max,
            default_ttl,
            next_id: AtomicU64::new(1),
            estimator,
            monitor,
            clock,
        }
    }

    #[inline]
    pub fn pool(&self, kind: ResourceKind) -> &KindPool {
        &self.pools[kind.index()]
    }

    #[inline]
    pub fn estimator(&self) -> &CapacityEstimator {
        &self.estimator
    }

    /// Ceiling for a kind under the current tier: the configured
    /// nominal size capped by the tier table.
    pub fn effective_cap(&self, kind: ResourceKind) -> usize {
        self.nominal_max
            .min(self.monitor.optimal_pool_sizes().for_kind(kind))
    }

    /// Pool checkout: reuse, construct below the ceiling, or report
    /// exhaustion for the overflow chain.
    pub fn try_acquire(&self, kind: ResourceKind, shape: &ShapeHint) -> PoolAcquire {
        let bucket = self.estimator.optimal_capacity(shape);
        self.pool(kind).acquire(
            bucket,
            self.effective_cap(kind),
            self.default_ttl,
            self.clock.now(),
            &self.next_id,
        )
    }

    /// Return a checked-out object to its kind's pool.
    pub fn give_back(&self, obj: PooledObject) {
        let kind = obj.kind();
        self.pool(kind)
            .release(obj, self.effective_cap(kind), self.clock.now());
    }

    /// Forget a checkout whose object left the engine.
    pub fn forget_issued(&self, kind: ResourceKind) {
        self.pool(kind).forget_issued();
    }

    /// Register a checkout created outside the acquire path.
    pub fn note_issued(&self, kind: ResourceKind) {
        self.pool(kind).note_issued();
    }

    /// Construct an object outside any pool's books (overflow
    /// strategies). The caller decides whether it is ever tracked.
    pub fn new_object(
        &self,
        kind: ResourceKind,
        shape: &ShapeHint,
        ttl: Option<Duration>,
    ) -> PooledObject {
        let bucket = self.estimator.optimal_capacity(shape);
        let now = self.clock.now();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut obj = PooledObject::new(
            id,
            Resource::with_capacity(kind, bucket),
            bucket,
            now,
            ttl,
        );
        obj.touch(now);
        obj
    }

    /// Remove the least-recently-used available object across every
    /// pool, regardless of kind.
    pub fn take_global_lru(&self) -> Option<PooledObject> {
        let oldest = self
            .pools
            .iter()
            .filter_map(|pool| pool.peek_lru().map(|ts| (pool.kind(), ts)))
            .min_by_key(|(_, ts)| *ts)?;
        self.pool(oldest.0).pop_lru()
    }

    /// Pre-populate every pool for its current ceiling.
    pub fn warm_up(&self, per_kind: usize, shape: &ShapeHint) -> usize {
        let bucket = self.estimator.optimal_capacity(shape);
        let now = self.clock.now();
        let mut added = 0;
        for pool in &self.pools {
            let cap = self.effective_cap(pool.kind());
            added += pool.preload(
                per_kind.min(cap),
                bucket,
                cap,
                self.default_ttl,
                now,
                &self.next_id,
            );
        }
        added
    }

    /// Drop TTL-expired available objects. Returns count and bytes.
    pub fn sweep_expired(&self) -> (usize, u64) {
        let now = self.clock.now();
        let mut count = 0;
        let mut bytes = 0;
        for pool in &self.pools {
            let (c, b) = pool.sweep_expired(now);
            count += c;
            bytes += b;
        }
        (count, bytes)
    }

    /// Trim every pool to the given tier table. Returns count and bytes.
    pub fn shrink_to_table(&self, table: &PoolSizeTable) -> (usize, u64) {
        let mut count = 0;
        let mut bytes = 0;
        for pool in &self.pools {
            let cap = self.nominal_max.min(table.for_kind(pool.kind()));
            let (c, b) = pool.shrink_to(cap);
            count += c;
            bytes += b;
        }
        (count, bytes)
    }

    /// Drop everything and zero issued counts.
    pub fn clear_all(&self) {
        for pool in &self.pools {
            pool.clear();
        }
    }

    /// Zero all stats counters.
    pub fn reset_counters(&self) {
        for pool in &self.pools {
            pool.reset_counters();
        }
    }

    /// Per-pool snapshots in kind order.
    pub fn snapshots(&self) -> Vec<PoolStatsSnapshot> {
        self.pools.iter().map(KindPool::snapshot).collect()
    }

    /// Counter totals across pools. The engine-wide reuse rate is
    /// derived by the coordinator, which also sees overflow
    /// allocations.
    pub fn totals(&self) -> PoolTotals {
        let mut totals = PoolTotals::default();
        for snap in self.snapshots() {
            totals.hits += snap.hits;
            totals.misses += snap.misses;
            totals.releases += snap.releases;
            totals.drops += snap.drops;
            totals.expired += snap.expired;
        }
        totals
    }
}
