use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::warn;

use crate::metrics::{LatencyHistogram, LatencyPercentiles};
use crate::overflow::{AcquireRequest, OverflowOutcome, OverflowStrategy, StrategyMetrics};
use crate::pool::{Lease, LeaseOrigin, PoolRegistry};
use crate::types::{Clock, ResourceKind};

/// Construction slower than this is logged as a warning.
const SLOW_CONSTRUCTION: Duration = Duration::from_millis(1);

/// Allocation-churn category derived from the cumulative fallback
/// count. Frequent fallback construction means the pools are
/// undersized and the allocator is doing the work they should absorb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GcPressure {
    Minimal,
    Moderate,
    Elevated,
    Severe,
}

impl GcPressure {
    fn from_creates(creates: u64) -> Self {
        match creates {
            0..=99 => GcPressure::Minimal,
            100..=499 => GcPressure::Moderate,
            500..=1999 => GcPressure::Elevated,
            _ => GcPressure::Severe,
        }
    }

    fn rank(self) -> u8 {
        match self {
            GcPressure::Minimal => 0,
            GcPressure::Moderate => 1,
            GcPressure::Elevated => 2,
            GcPressure::Severe => 3,
        }
    }
}

/// What unpooled construction is costing, with recommendations.
#[derive(Debug, Clone, Serialize)]
pub struct ImpactAssessment {
    pub fallback_creates: u64,
    /// Estimated extra bytes allocated outside the pools, per kind
    pub est_extra_bytes: Vec<(ResourceKind, u64)>,
    pub gc_pressure: GcPressure,
    pub recommendations: Vec<String>,
}

/// Terminal overflow strategy: construct a brand-new, unpooled object.
///
/// Always eligible, never fails; the cost is allocation churn, which
/// this strategy measures instead of hiding.
pub struct GracefulFallback {
    registry: Arc<PoolRegistry>,
    clock: Arc<dyn Clock>,
    creates: AtomicU64,
    per_kind_creates: [AtomicU64; 4],
    per_kind_bytes: [AtomicU64; 4],
    slow_creates: AtomicU64,
    latency: LatencyHistogram,
}

impl GracefulFallback {
    pub fn new(registry: Arc<PoolRegistry>, clock: Arc<dyn Clock>) -> Self {
        Self {
            registry,
            clock,
            creates: AtomicU64::new(0),
            per_kind_creates: std::array::from_fn(|_| AtomicU64::new(0)),
            per_kind_bytes: std::array::from_fn(|_| AtomicU64::new(0)),
            slow_creates: AtomicU64::new(0),
            latency: LatencyHistogram::new(),
        }
    }

    pub fn creates(&self) -> u64 {
        self.creates.load(Ordering::Relaxed)
    }

    pub fn latency_percentiles(&self) -> LatencyPercentiles {
        self.latency.percentiles()
    }

    pub fn gc_pressure(&self) -> GcPressure {
        GcPressure::from_creates(self.creates())
    }

    /// Assess the cumulative cost of falling back and suggest fixes.
    pub fn impact_assessment(&self) -> ImpactAssessment {
        let creates = self.creates();
        let gc_pressure = GcPressure::from_creates(creates);

        let est_extra_bytes: Vec<(ResourceKind, u64)> = ResourceKind::ALL
            .iter()
            .map(|&kind| {
                (
                    kind,
                    self.per_kind_bytes[kind.index()].load(Ordering::Relaxed),
                )
            })
            .filter(|(_, bytes)| *bytes > 0)
            .collect();

        let mut recommendations = Vec::new();
        if let Some((kind, _)) = est_extra_bytes
            .iter()
            .max_by_key(|(_, bytes)| *bytes)
        {
            recommendations.push(format!(
                "increase pool size for `{}` objects; they fall back most",
                kind
            ));
        }
        if gc_pressure >= GcPressure::Elevated {
            recommendations
                .push("configure an emergency limit to absorb bursts elastically".to_string());
        }
        if self.slow_creates.load(Ordering::Relaxed) > 0 {
            recommendations
                .push("warm up pools at startup to avoid slow cold constructions".to_string());
        }

        ImpactAssessment {
            fallback_creates: creates,
            est_extra_bytes,
            gc_pressure,
            recommendations,
        }
    }

    pub fn reset_counters(&self) {
        self.creates.store(0, Ordering::Relaxed);
        for counter in &self.per_kind_creates {
            counter.store(0, Ordering::Relaxed);
        }
        for counter in &self.per_kind_bytes {
            counter.store(0, Ordering::Relaxed);
        }
        self.slow_creates.store(0, Ordering::Relaxed);
        self.latency.reset();
    }
}

impl OverflowStrategy for GracefulFallback {
    fn name(&self) -> &'static str {
        "fallback"
    }

    fn can_handle(&self, _kind: ResourceKind, _req: &AcquireRequest) -> bool {
        true
    }

    fn handle(&self, kind: ResourceKind, req: &AcquireRequest) -> Option<OverflowOutcome> {
        let start = self.clock.now();
        let obj = self.registry.new_object(kind, &req.shape, None);
        let elapsed = self.clock.now().saturating_duration_since(start);

        self.latency.record(elapsed.as_nanos() as u64);
        if elapsed > SLOW_CONSTRUCTION {
            self.slow_creates.fetch_add(1, Ordering::Relaxed);
            warn!(
                kind = %kind,
                elapsed_us = elapsed.as_micros() as u64,
                "slow fallback construction"
            );
        }

        self.creates.fetch_add(1, Ordering::Relaxed);
        self.per_kind_creates[kind.index()].fetch_add(1, Ordering::Relaxed);
        self.per_kind_bytes[kind.index()]
            .fetch_add(obj.approx_bytes() as u64, Ordering::Relaxed);

        Some(OverflowOutcome::Provided(Lease::new(
            obj,
            LeaseOrigin::Fallback,
            Arc::clone(&self.registry),
            None,
        )))
    }

    fn metrics(&self) -> StrategyMetrics {
        StrategyMetrics {
            name: self.name(),
            attempts: self.creates(),
            fulfilled: self.creates(),
            detail: vec![
                (
                    "slow_creates",
                    self.slow_creates.load(Ordering::Relaxed) as f64,
                ),
                ("gc_pressure", self.gc_pressure().rank() as f64),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capacity::{CapacityEstimator, ShapeHint};
    use crate::config::PoolConfig;
    use crate::memory::{MemoryPressureMonitor, StaticProbe};
    use crate::types::ManualClock;

    fn fallback() -> GracefulFallback {
        let clock = Arc::new(ManualClock::new());
        let probe = Arc::new(StaticProbe::new(0));
        let monitor = Arc::new(MemoryPressureMonitor::new(probe, 256 * 1024 * 1024, 0.8));
        let registry = Arc::new(PoolRegistry::new(
            10,
            None,
            CapacityEstimator::from_config(&PoolConfig::default()),
            monitor,
            clock.clone(),
        ));
        GracefulFallback::new(registry, clock)
    }

    #[test]
    fn test_always_eligible() {
        let strategy = fallback();
        for kind in ResourceKind::ALL {
            assert!(strategy.can_handle(kind, &AcquireRequest::default()));
        }
    }

    #[test]
    fn test_handle_always_provides() {
        let strategy = fallback();
        let outcome = strategy.handle(ResourceKind::Message, &AcquireRequest::default());
        match outcome {
            Some(OverflowOutcome::Provided(lease)) => {
                assert_eq!(lease.kind(), ResourceKind::Message);
                assert_eq!(lease.origin(), LeaseOrigin::Fallback);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(strategy.creates(), 1);
    }

    #[test]
    fn test_gc_pressure_categories() {
        assert_eq!(GcPressure::from_creates(0), GcPressure::Minimal);
        assert_eq!(GcPressure::from_creates(99), GcPressure::Minimal);
        assert_eq!(GcPressure::from_creates(100), GcPressure::Moderate);
        assert_eq!(GcPressure::from_creates(500), GcPressure::Elevated);
        assert_eq!(GcPressure::from_creates(5000), GcPressure::Severe);
    }

    #[test]
    fn test_impact_assessment_recommends_pool_growth() {
        let strategy = fallback();
        let req = AcquireRequest::new(ShapeHint::buffer(1000));
        for _ in 0..5 {
            let _ = strategy.handle(ResourceKind::Buffer, &req);
        }

        let assessment = strategy.impact_assessment();
        assert_eq!(assessment.fallback_creates, 5);
        assert_eq!(assessment.gc_pressure, GcPressure::Minimal);
        assert!(assessment
            .est_extra_bytes
            .iter()
            .any(|(kind, bytes)| *kind == ResourceKind::Buffer && *bytes > 0));
        assert!(assessment
            .recommendations
            .iter()
            .any(|r| r.contains("increase pool size")));
    }

    #[test]
    fn test_latency_recorded() {
        let strategy = fallback();
        let _ = strategy.handle(ResourceKind::Buffer, &AcquireRequest::default());
        assert_eq!(strategy.latency_percentiles().count, 1);
    }

    #[test]
    fn test_assessment_serializes() {
        let strategy = fallback();
        let _ = strategy.handle(ResourceKind::Uri, &AcquireRequest::default());
        let json = serde_json::to_value(strategy.impact_assessment()).unwrap();
        assert_eq!(json["fallback_creates"], 1);
        assert_eq!(json["gc_pressure"], "minimal");
    }
}
