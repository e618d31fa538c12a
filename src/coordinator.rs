//! Engine façade: owns the pools, caches, monitor, and overflow chain.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::capacity::{CapacityEstimator, ShapeHint};
use crate::config::PoolConfig;
use crate::error::Result;
use crate::eviction::{HeaderCache, OpsCache};
use crate::memory::{
    MemoryPressureMonitor, MemoryProbe, MemoryTier, PoolSizeTable, ProcessProbe,
};
use crate::metrics::{CacheStats, EngineStats};
use crate::overflow::{
    AcquireRequest, ElasticExpansion, ElasticLedger, GracefulFallback, ImpactAssessment,
    OverflowChain, OverflowOutcome, OverflowStrategy, PriorityQueue, PriorityQueuing, QueuePoll,
    QueueTicket, SmartRecycling,
};
use crate::pool::{Lease, LeaseOrigin, PoolAcquire, PoolRegistry};
use crate::types::{Clock, ResourceKind, SystemClock};

/// Header names every warmed-up engine interns and protects.
const COMMON_HEADER_NAMES: &[&[u8]] = &[
    b"Content-Type",
    b"Content-Length",
    b"Accept",
    b"Accept-Encoding",
    b"Cache-Control",
    b"Connection",
    b"Host",
    b"User-Agent",
];

/// Objects pre-constructed per kind by warm-up.
const WARM_OBJECTS_PER_KIND: usize = 8;

/// Result of a checkout that may have been parked.
#[derive(Debug)]
pub enum Checkout {
    /// Served immediately (pool or overflow construction)
    Ready(Lease),
    /// Parked in the priority queue; poll the ticket
    Queued(QueueTicket),
}

/// The pooling engine.
///
/// One value per server instance, created at startup and torn down at
/// shutdown; there is no process-wide state. All entry points take
/// `&self` and are safe to share behind an `Arc`.
pub struct PoolCoordinator {
    config: PoolConfig,
    monitor: Arc<MemoryPressureMonitor>,
    registry: Arc<PoolRegistry>,
    chain: OverflowChain,
    elastic: Arc<ElasticLedger>,
    queue: Arc<PriorityQueue>,
    fallback: Arc<GracefulFallback>,
    recycling: Arc<SmartRecycling>,
    header_cache: HeaderCache,
    ops_cache: OpsCache,
}

impl PoolCoordinator {
    /// Build with the process probe and system clock.
    pub fn new(config: PoolConfig) -> Result<Self> {
        Self::with_parts(config, Arc::new(SystemClock), Arc::new(ProcessProbe))
    }

    /// Build with explicit clock and memory probe.
    ///
    /// Validation is atomic: on any configuration error nothing has
    /// been constructed.
    pub fn with_parts(
        config: PoolConfig,
        clock: Arc<dyn Clock>,
        probe: Arc<dyn MemoryProbe>,
    ) -> Result<Self> {
        config.validate()?;

        let monitor = Arc::new(MemoryPressureMonitor::new(
            probe,
            config.memory_limit_bytes,
            config.memory_limit_threshold,
        ));
        let default_ttl = match config.default_ttl_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        let registry = Arc::new(PoolRegistry::new(
            config.max_pool_size,
            default_ttl,
            CapacityEstimator::from_config(&config),
            Arc::clone(&monitor),
            Arc::clone(&clock),
        ));

        let elastic = Arc::new(ElasticLedger::new(config.emergency_limit, Arc::clone(&clock)));
        let queue = Arc::new(PriorityQueue::new(config.max_queue_size, Arc::clone(&clock)));
        let fallback = Arc::new(GracefulFallback::new(
            Arc::clone(&registry),
            Arc::clone(&clock),
        ));
        let recycling = Arc::new(SmartRecycling::new(
            Arc::clone(&registry),
            Arc::clone(&clock),
        ));

        // Fixed order; fresh construction accepts everything, so it
        // terminates the chain.
        let chain = OverflowChain::new(vec![
            Arc::new(ElasticExpansion::new(
                Arc::clone(&elastic),
                Arc::clone(&registry),
            )) as Arc<dyn OverflowStrategy>,
            Arc::new(PriorityQueuing::new(Arc::clone(&queue))),
            Arc::clone(&recycling) as Arc<dyn OverflowStrategy>,
            Arc::clone(&fallback) as Arc<dyn OverflowStrategy>,
        ]);

        let aux_cap = monitor.optimal_pool_sizes().aux_cache;
        let coordinator = Self {
            header_cache: HeaderCache::new(aux_cap, Arc::clone(&clock)),
            ops_cache: OpsCache::new(aux_cap),
            config,
            monitor,
            registry,
            chain,
            elastic,
            queue,
            fallback,
            recycling,
        };

        if coordinator.config.warm_on_init {
            coordinator.warm_up_all_pools();
        }

        info!(
            max_pool_size = coordinator.config.max_pool_size,
            emergency_limit = coordinator.config.emergency_limit,
            "pool coordinator initialized"
        );
        Ok(coordinator)
    }

    /// Check out an object, absorbing exhaustion through the overflow
    /// chain. Never fails; plain acquires carry no priority and are
    /// therefore never parked.
    pub fn acquire(&self, kind: ResourceKind, shape: ShapeHint) -> Lease {
        match self.acquire_with(kind, AcquireRequest::new(shape)) {
            Checkout::Ready(lease) => lease,
            Checkout::Queued(_) => unreachable!("plain acquires carry no priority"),
        }
    }

    /// Check out with full request options (priority, timeout, stress).
    pub fn acquire_with(&self, kind: ResourceKind, req: AcquireRequest) -> Checkout {
        match self.registry.try_acquire(kind, &req.shape) {
            PoolAcquire::Reused(obj) | PoolAcquire::Created(obj) => Checkout::Ready(Lease::new(
                obj,
                LeaseOrigin::Pooled,
                Arc::clone(&self.registry),
                None,
            )),
            PoolAcquire::Exhausted => match self.chain.run(kind, &req) {
                OverflowOutcome::Provided(lease) => Checkout::Ready(lease),
                OverflowOutcome::Queued(ticket) => Checkout::Queued(ticket),
            },
        }
    }

    /// Return a checked-out object. Equivalent to dropping the lease.
    pub fn release(&self, lease: Lease) {
        drop(lease);
    }

    /// Hand a lease over as a recycling candidate instead of
    /// returning it to its pool.
    pub fn surrender(&self, lease: Lease) {
        if let Some(obj) = lease.into_object() {
            self.recycling.park(obj);
        }
    }

    /// Poll a queued checkout.
    pub fn poll(&self, ticket: QueueTicket) -> QueuePoll {
        self.queue.poll(ticket)
    }

    /// Drain the priority queue against current pool availability.
    /// Call whenever capacity frees up. Returns requests served.
    pub fn process_queue(&self) -> usize {
        let registry = &self.registry;
        self.queue
            .process_queue(|kind, shape| match registry.try_acquire(kind, shape) {
                PoolAcquire::Reused(obj) | PoolAcquire::Created(obj) => Some(Lease::new(
                    obj,
                    LeaseOrigin::Pooled,
                    Arc::clone(registry),
                    None,
                )),
                PoolAcquire::Exhausted => None,
            })
    }

    /// Pre-populate pools and protect the common header names,
    /// avoiding cold-start misses. Returns objects created.
    pub fn warm_up_all_pools(&self) -> usize {
        for name in COMMON_HEADER_NAMES {
            self.header_cache.protect(name);
        }
        let added = self.registry.warm_up(WARM_OBJECTS_PER_KIND, &ShapeHint::empty());
        debug!(added, "pools warmed up");
        added
    }

    /// Intern a header name through the bounded cache.
    pub fn intern_header(&self, name: &[u8]) -> Bytes {
        self.header_cache.intern(name)
    }

    #[inline]
    pub fn header_cache(&self) -> &HeaderCache {
        &self.header_cache
    }

    #[inline]
    pub fn ops_cache(&self) -> &OpsCache {
        &self.ops_cache
    }

    #[inline]
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Pool bucket a payload of this shape would land in.
    pub fn optimal_capacity(&self, shape: &ShapeHint) -> usize {
        self.registry.estimator().optimal_capacity(shape)
    }

    /// Current memory tier.
    pub fn memory_tier(&self) -> MemoryTier {
        self.monitor.current_tier()
    }

    /// Per-kind pool ceilings for the current tier.
    pub fn optimal_pool_sizes(&self) -> PoolSizeTable {
        self.monitor.optimal_pool_sizes()
    }

    /// Cumulative cost report for unpooled construction.
    pub fn fallback_impact(&self) -> ImpactAssessment {
        self.fallback.impact_assessment()
    }

    /// Aggregate statistics across pools, caches, memory, and the
    /// overflow chain.
    pub fn stats(&self) -> EngineStats {
        let pools = self.registry.snapshots();
        let mut totals = self.registry.totals();

        let reuses = totals.hits;
        let allocations = totals.misses + self.fallback.creates() + self.elastic.created();
        totals.reuse_rate_pct = if reuses + allocations == 0 {
            0.0
        } else {
            reuses as f64 / (reuses + allocations) as f64 * 100.0
        };

        EngineStats {
            pools,
            totals,
            memory: self.monitor.snapshot(),
            caches: CacheStats {
                header_entries: self.header_cache.len(),
                header_evictions: self.header_cache.evictions(),
                ops_entries: self.ops_cache.len(),
                ops_evictions: self.ops_cache.evictions(),
            },
            overflow: self.chain.metrics(),
            queue_depth: self.queue.depth(),
            fallback_latency: self.fallback.latency_percentiles(),
        }
    }

    /// INFO-style text rendering of `stats()`.
    pub fn info(&self, section: Option<&str>) -> String {
        self.stats().to_info_string(section)
    }

    /// Drop TTL-expired pooled objects, stale elastic entries, and
    /// expired queue requests. Returns estimated bytes freed.
    pub fn garbage_collect(&self) -> u64 {
        let (pool_count, pool_bytes) = self.registry.sweep_expired();
        let (elastic_count, elastic_bytes) = self.elastic.clean_expired();
        let queue_expired = self.queue.sweep_expired();

        let freed = pool_bytes + elastic_bytes;
        debug!(
            pool_count,
            elastic_count, queue_expired, freed, "garbage collection pass"
        );
        freed
    }

    /// Run a cleanup pass if usage has crossed the configured
    /// fraction of the memory ceiling. Returns whether it ran.
    pub fn force_cleanup_if_needed(&self) -> bool {
        if !self.monitor.needs_cleanup() {
            return false;
        }

        let freed = self.garbage_collect();
        let table = self.monitor.optimal_pool_sizes();
        let (trimmed, trimmed_bytes) = self.registry.shrink_to_table(&table);
        self.monitor.record_cleanup();
        warn!(
            freed,
            trimmed, trimmed_bytes, "memory ceiling exceeded, forced cleanup"
        );

        if self.monitor.needs_cleanup() {
            // Still over budget: drop the auxiliary caches too.
            self.header_cache.clear();
            self.ops_cache.clear();
            warn!("still over budget after cleanup, cleared auxiliary caches");
        }
        true
    }

    /// Periodic self-management: re-derive tier ceilings for the
    /// caches, shrink pools under critical pressure, and force a
    /// cleanup when the memory ceiling is exceeded.
    pub fn auto_manage(&self) {
        let tier = self.monitor.current_tier();
        let table = PoolSizeTable::for_tier(tier);

        self.header_cache.set_cap(table.aux_cache);
        self.ops_cache.set_cap(table.aux_cache);

        if tier == MemoryTier::Critical {
            let (count, bytes) = self.registry.shrink_to_table(&table);
            if count > 0 {
                warn!(count, bytes, "critical memory tier, pools shrunk");
            }
        }

        self.force_cleanup_if_needed();
    }

    /// Reset every pool, cache, queue, and counter (test isolation).
    pub fn clear_all(&self) {
        self.registry.clear_all();
        self.registry.reset_counters();
        self.elastic.clear();
        self.elastic.reset_counters();
        self.queue.clear();
        self.queue.reset_counters();
        self.fallback.reset_counters();
        self.recycling.clear();
        self.recycling.reset_counters();
        self.header_cache.clear();
        self.header_cache.reset_counters();
        self.ops_cache.clear();
        self.ops_cache.reset_counters();
        self.monitor.reset();
        debug!("engine state cleared");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::StaticProbe;
    use crate::types::{ManualClock, Priority};

    const MB: u64 = 1024 * 1024;

    fn engine(config: PoolConfig) -> (Arc<ManualClock>, Arc<StaticProbe>, PoolCoordinator) {
        let clock = Arc::new(ManualClock::new());
        let probe = Arc::new(StaticProbe::new(0));
        let coordinator =
            PoolCoordinator::with_parts(config, clock.clone(), probe.clone()).unwrap();
        (clock, probe, coordinator)
    }

    #[test]
    fn test_invalid_config_rejected_atomically() {
        let config = PoolConfig {
            max_pool_size: 0,
            ..Default::default()
        };
        assert!(PoolCoordinator::new(config).is_err());
    }

    #[test]
    fn test_exhaustion_served_by_fallback() {
        let config = PoolConfig {
            max_pool_size: 2,
            ..Default::default()
        };
        let (_, _, engine) = engine(config);

        let a = engine.acquire(ResourceKind::Buffer, ShapeHint::empty());
        let b = engine.acquire(ResourceKind::Buffer, ShapeHint::empty());
        let c = engine.acquire(ResourceKind::Buffer, ShapeHint::empty());

        assert_eq!(a.origin(), LeaseOrigin::Pooled);
        assert_eq!(b.origin(), LeaseOrigin::Pooled);
        assert_eq!(c.origin(), LeaseOrigin::Fallback);

        let stats = engine.stats();
        assert_eq!(stats.totals.misses, 2);
        let fallback = stats
            .overflow
            .iter()
            .find(|s| s.name == "fallback")
            .unwrap();
        assert_eq!(fallback.fulfilled, 1);
    }

    #[test]
    fn test_critical_memory_shrinks_size_tables() {
        let (_, probe, engine) = engine(PoolConfig::default());

        probe.set(250 * MB);
        let table = engine.optimal_pool_sizes();
        assert_eq!(engine.memory_tier(), MemoryTier::Critical);
        assert_eq!(table.buffer, 100);
        assert_eq!(table.message, 10);
        assert_eq!(table.stream, 20);
        assert_eq!(table.aux_cache, 50);
    }

    #[test]
    fn test_queue_serves_system_before_low() {
        let config = PoolConfig {
            max_pool_size: 1,
            ..Default::default()
        };
        let (_, _, engine) = engine(config);

        let held = engine.acquire(ResourceKind::Buffer, ShapeHint::empty());

        let system = match engine.acquire_with(
            ResourceKind::Buffer,
            AcquireRequest::new(ShapeHint::empty())
                .with_priority(Priority::System)
                .with_timeout(Duration::from_secs(1)),
        ) {
            Checkout::Queued(ticket) => ticket,
            other => panic!("unexpected {:?}", other),
        };
        let low = match engine.acquire_with(
            ResourceKind::Buffer,
            AcquireRequest::new(ShapeHint::empty())
                .with_priority(Priority::Low)
                .with_timeout(Duration::from_secs(1)),
        ) {
            Checkout::Queued(ticket) => ticket,
            other => panic!("unexpected {:?}", other),
        };

        // Capacity frees up; the drain serves in priority order.
        engine.release(held);
        assert_eq!(engine.process_queue(), 1);

        assert!(matches!(engine.poll(system), QueuePoll::Ready(_)));
        assert!(matches!(engine.poll(low), QueuePoll::Pending));
    }

    #[test]
    fn test_queue_timeout_outcome() {
        let config = PoolConfig {
            max_pool_size: 1,
            ..Default::default()
        };
        let (clock, _, engine) = engine(config);

        let _held = engine.acquire(ResourceKind::Buffer, ShapeHint::empty());
        let ticket = match engine.acquire_with(
            ResourceKind::Buffer,
            AcquireRequest::new(ShapeHint::empty())
                .with_priority(Priority::Normal)
                .with_timeout(Duration::from_secs(1)),
        ) {
            Checkout::Queued(ticket) => ticket,
            other => panic!("unexpected {:?}", other),
        };

        clock.advance(Duration::from_secs(2));
        assert!(matches!(engine.poll(ticket), QueuePoll::TimedOut));
    }

    #[test]
    fn test_no_double_issue() {
        let (_, _, engine) = engine(PoolConfig::default());

        let a = engine.acquire(ResourceKind::Message, ShapeHint::empty());
        let b = engine.acquire(ResourceKind::Message, ShapeHint::empty());
        assert_ne!(a.id(), b.id());

        // Once released, the object may circulate again.
        let released_id = a.id();
        engine.release(a);
        let c = engine.acquire(ResourceKind::Message, ShapeHint::empty());
        assert_eq!(c.id(), released_id);
    }

    #[test]
    fn test_elastic_growth_when_configured() {
        let config = PoolConfig {
            max_pool_size: 1,
            emergency_limit: 2,
            ..Default::default()
        };
        let (_, _, engine) = engine(config);

        let _held = engine.acquire(ResourceKind::Stream, ShapeHint::empty());
        let elastic = engine.acquire(ResourceKind::Stream, ShapeHint::empty());

        assert!(matches!(elastic.origin(), LeaseOrigin::Elastic(_)));
        let stats = engine.stats();
        let elastic_metrics = stats.overflow.iter().find(|s| s.name == "elastic").unwrap();
        assert_eq!(elastic_metrics.fulfilled, 1);
    }

    #[test]
    fn test_surrendered_object_recycled_under_stress() {
        let config = PoolConfig {
            max_pool_size: 1,
            ..Default::default()
        };
        let (_, _, engine) = engine(config);

        let lease = engine.acquire(ResourceKind::Stream, ShapeHint::empty());
        let surrendered_id = lease.id();
        engine.surrender(lease);

        // The pool still counts nothing available, so a stressed
        // checkout goes to the recycler.
        let _held = engine.acquire(ResourceKind::Stream, ShapeHint::empty());
        let recycled = match engine.acquire_with(
            ResourceKind::Stream,
            AcquireRequest::new(ShapeHint::empty()).with_stress(0.9),
        ) {
            Checkout::Ready(lease) => lease,
            other => panic!("unexpected {:?}", other),
        };

        assert_eq!(recycled.origin(), LeaseOrigin::Recycled);
        assert_eq!(recycled.id(), surrendered_id);
    }

    #[test]
    fn test_warm_up_avoids_cold_misses() {
        let config = PoolConfig {
            warm_on_init: true,
            ..Default::default()
        };
        let (_, _, engine) = engine(config);

        let lease = engine.acquire(ResourceKind::Message, ShapeHint::empty());
        drop(lease);

        let stats = engine.stats();
        assert_eq!(stats.totals.misses, 0);
        assert_eq!(stats.totals.hits, 1);

        // Common header names are protected and present.
        assert!(engine.header_cache().contains(b"Content-Type"));
    }

    #[test]
    fn test_garbage_collect_reports_bytes() {
        let config = PoolConfig {
            default_ttl_secs: 10,
            ..Default::default()
        };
        let (clock, _, engine) = engine(config);

        let lease = engine.acquire(ResourceKind::Buffer, ShapeHint::empty());
        engine.release(lease);

        clock.advance(Duration::from_secs(60));
        assert!(engine.garbage_collect() > 0);
        assert_eq!(engine.stats().totals.expired, 1);
    }

    #[test]
    fn test_force_cleanup_over_ceiling() {
        let (_, probe, engine) = engine(PoolConfig::default());

        probe.set(10 * MB);
        assert!(!engine.force_cleanup_if_needed());

        // Over 80% of the 256 MB default ceiling.
        probe.set(230 * MB);
        assert!(engine.force_cleanup_if_needed());
        assert_eq!(engine.stats().memory.cleanup_cycles, 1);

        // Still over budget: the auxiliary caches were dropped.
        engine.intern_header(b"x-scratch");
        engine.force_cleanup_if_needed();
        assert_eq!(engine.header_cache().len(), 0);
    }

    #[test]
    fn test_auto_manage_shrinks_caches_with_tier() {
        let (_, probe, engine) = engine(PoolConfig::default());
        for i in 0..200 {
            engine.intern_header(format!("x-head-{}", i).as_bytes());
        }
        assert!(engine.header_cache().len() > 50);

        probe.set(250 * MB);
        engine.auto_manage();
        // Critical tier caps the auxiliary caches at 50.
        assert!(engine.header_cache().len() <= 50);
    }

    #[test]
    fn test_clear_all_resets_counters_and_pools() {
        let (_, _, engine) = engine(PoolConfig::default());

        let lease = engine.acquire(ResourceKind::Buffer, ShapeHint::empty());
        engine.release(lease);
        engine.intern_header(b"Content-Type");
        assert!(engine.stats().totals.misses > 0);

        engine.clear_all();
        let stats = engine.stats();
        assert_eq!(stats.totals.hits, 0);
        assert_eq!(stats.totals.misses, 0);
        assert_eq!(stats.caches.header_entries, 0);
        for pool in &stats.pools {
            assert_eq!(pool.issued, 0);
            assert_eq!(pool.available_total(), 0);
        }
    }

    #[test]
    fn test_release_after_clear_does_not_corrupt() {
        let (_, _, engine) = engine(PoolConfig::default());

        let lease = engine.acquire(ResourceKind::Buffer, ShapeHint::empty());
        engine.clear_all();
        // The stale lease returns without underflowing the books.
        engine.release(lease);
        assert_eq!(engine.stats().pools[ResourceKind::Buffer.index()].issued, 0);
    }

    #[test]
    fn test_take_severs_from_engine() {
        let (_, _, engine) = engine(PoolConfig::default());

        let lease = engine.acquire(ResourceKind::Buffer, ShapeHint::empty());
        let resource = lease.take();
        assert_eq!(resource.kind(), ResourceKind::Buffer);

        let stats = engine.stats();
        assert_eq!(stats.pools[ResourceKind::Buffer.index()].issued, 0);
        assert_eq!(stats.pools[ResourceKind::Buffer.index()].available_total(), 0);
    }

    #[test]
    fn test_reuse_rate_accounts_for_overflow() {
        let config = PoolConfig {
            max_pool_size: 1,
            ..Default::default()
        };
        let (_, _, engine) = engine(config);

        let held = engine.acquire(ResourceKind::Buffer, ShapeHint::empty());
        let _fallback = engine.acquire(ResourceKind::Buffer, ShapeHint::empty());
        engine.release(held);
        let _reused = engine.acquire(ResourceKind::Buffer, ShapeHint::empty());

        // 1 reuse, 1 pool miss, 1 fallback construction.
        let stats = engine.stats();
        assert!((stats.totals.reuse_rate_pct - 100.0 / 3.0).abs() < 0.1);
    }

    #[test]
    fn test_optimal_capacity_rounds_to_bucket() {
        let (_, _, engine) = engine(PoolConfig::default());
        assert_eq!(engine.optimal_capacity(&ShapeHint::empty()), 8192);
        // small category (256) + 700-byte body = 956 -> 1024
        assert_eq!(engine.optimal_capacity(&ShapeHint::message(4, 700)), 1024);
    }

    #[test]
    fn test_stats_serialize_and_info() {
        let (_, _, engine) = engine(PoolConfig::default());
        let _lease = engine.acquire(ResourceKind::Message, ShapeHint::message(4, 256));

        let json = serde_json::to_value(engine.stats()).unwrap();
        assert!(json["pools"].is_array());
        assert!(json["overflow"].is_array());

        let info = engine.info(None);
        assert!(info.contains("# Pools"));
        assert!(info.contains("# Overflow"));

        let filtered = engine.info(Some("memory"));
        assert!(filtered.contains("# Memory"));
        assert!(!filtered.contains("# Pools"));
    }
}
