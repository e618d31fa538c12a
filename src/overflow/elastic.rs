use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::overflow::{AcquireRequest, OverflowOutcome, OverflowStrategy, StrategyMetrics};
use crate::pool::{Lease, LeaseOrigin, PoolRegistry};
use crate::types::{Clock, ResourceKind};

/// Base TTL for an elastic object with no concurrent elastic load.
pub const ELASTIC_BASE_TTL: Duration = Duration::from_secs(300);

/// How much of the base TTL is shaved off at full elastic load.
const MAX_TTL_REDUCTION: f64 = 0.8;

#[derive(Debug)]
struct ElasticEntry {
    kind: ResourceKind,
    created_at: Instant,
    ttl: Duration,
    approx_bytes: usize,
}

/// Tracks objects living past the nominal pool ceiling.
///
/// Every elastic object carries a TTL that shrinks as the concurrent
/// elastic count grows, so emergency growth self-limits under
/// sustained load. Entries for leases that ended are untracked; stale
/// entries (whose TTL elapsed while the lease is still out) are
/// reclaimed by `clean_expired`, freeing headroom for new elastic
/// allocations.
pub struct ElasticLedger {
    entries: Mutex<FxHashMap<u64, ElasticEntry>>,
    emergency_limit: usize,
    created: AtomicU64,
    returned: AtomicU64,
    reclaimed: AtomicU64,
    peak_active: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl ElasticLedger {
    pub fn new(emergency_limit: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(FxHashMap::default()),
            emergency_limit,
            created: AtomicU64::new(0),
            returned: AtomicU64::new(0),
            reclaimed: AtomicU64::new(0),
            peak_active: AtomicU64::new(0),
            clock,
        }
    }

    #[inline]
    pub fn emergency_limit(&self) -> usize {
        self.emergency_limit
    }

    /// Currently tracked elastic objects.
    pub fn active(&self) -> usize {
        self.entries.lock().len()
    }

    /// TTL for an object entering at the given concurrent count.
    /// Monotonically non-increasing in the count: base 5 minutes,
    /// reduced by up to 80% as the count approaches the limit.
    pub fn ttl_for(&self, active: usize) -> Duration {
        if self.emergency_limit == 0 {
            return ELASTIC_BASE_TTL;
        }
        let load = (active as f64 / self.emergency_limit as f64).min(1.0);
        ELASTIC_BASE_TTL.mul_f64(1.0 - MAX_TTL_REDUCTION * load)
    }

    /// Track a new elastic object, returning the TTL assigned to it.
    pub(crate) fn track(&self, id: u64, kind: ResourceKind, approx_bytes: usize) -> Duration {
        let mut entries = self.entries.lock();
        let ttl = self.ttl_for(entries.len() + 1);
        entries.insert(
            id,
            ElasticEntry {
                kind,
                created_at: self.clock.now(),
                ttl,
                approx_bytes,
            },
        );
        self.created.fetch_add(1, Ordering::Relaxed);

        let active = entries.len() as u64;
        self.peak_active.fetch_max(active, Ordering::Relaxed);
        ttl
    }

    /// Untrack a returned elastic object.
    pub fn untrack(&self, id: u64) -> bool {
        let removed = self.entries.lock().remove(&id).is_some();
        if removed {
            self.returned.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    /// Reclaim entries whose TTL elapsed. Returns count and estimated
    /// bytes released.
    pub fn clean_expired(&self) -> (usize, u64) {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let mut count = 0;
        let mut bytes = 0u64;
        entries.retain(|id, entry| {
            if now.saturating_duration_since(entry.created_at) >= entry.ttl {
                debug!(id, kind = %entry.kind, "reclaiming stale elastic object");
                count += 1;
                bytes += entry.approx_bytes as u64;
                false
            } else {
                true
            }
        });
        self.reclaimed.fetch_add(count as u64, Ordering::Relaxed);
        (count, bytes)
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn reset_counters(&self) {
        self.created.store(0, Ordering::Relaxed);
        self.returned.store(0, Ordering::Relaxed);
        self.reclaimed.store(0, Ordering::Relaxed);
        self.peak_active.store(0, Ordering::Relaxed);
    }

    pub fn created(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }

    pub fn reclaimed(&self) -> u64 {
        self.reclaimed.load(Ordering::Relaxed)
    }
}

/// Temporary growth past the nominal ceiling, bounded by the
/// configured emergency limit. Disabled entirely when no emergency
/// headroom is configured.
pub struct ElasticExpansion {
    ledger: Arc<ElasticLedger>,
    registry: Arc<PoolRegistry>,
}

impl ElasticExpansion {
    pub fn new(ledger: Arc<ElasticLedger>, registry: Arc<PoolRegistry>) -> Self {
        Self { ledger, registry }
    }
}

impl OverflowStrategy for ElasticExpansion {
    fn name(&self) -> &'static str {
        "elastic"
    }

    fn can_handle(&self, _kind: ResourceKind, _req: &AcquireRequest) -> bool {
        self.ledger.emergency_limit() > 0 && self.ledger.active() < self.ledger.emergency_limit()
    }

    fn handle(&self, kind: ResourceKind, req: &AcquireRequest) -> Option<OverflowOutcome> {
        let mut obj = self.registry.new_object(kind, &req.shape, None);
        let ttl = self.ledger.track(obj.id(), kind, obj.approx_bytes());
        obj.set_ttl(Some(ttl));

        let id = obj.id();
        Some(OverflowOutcome::Provided(Lease::new(
            obj,
            LeaseOrigin::Elastic(id),
            Arc::clone(&self.registry),
            Some(Arc::clone(&self.ledger)),
        )))
    }

    fn metrics(&self) -> StrategyMetrics {
        StrategyMetrics {
            name: self.name(),
            attempts: self.ledger.created(),
            fulfilled: self.ledger.created(),
            detail: vec![
                ("active", self.ledger.active() as f64),
                (
                    "returned",
                    self.ledger.returned.load(Ordering::Relaxed) as f64,
                ),
                ("reclaimed", self.ledger.reclaimed() as f64),
                (
                    "peak_active",
                    self.ledger.peak_active.load(Ordering::Relaxed) as f64,
                ),
            ],
        }
    }
}
