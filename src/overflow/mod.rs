//! Overflow handling for exhausted pools.
//!
//! When a pool is at its ceiling with nothing available, an ordered
//! chain of strategies runs: elastic over-allocation, priority
//! queueing, stress-gated recycling, and finally unconditional fresh
//! construction. The first strategy that accepts and fulfills the
//! request wins; fresh construction is the terminal case, so a
//! checkout of a recognized kind never fails outright.

mod elastic;
mod fallback;
mod queue;
mod recycle;

pub use elastic::{ElasticExpansion, ElasticLedger, ELASTIC_BASE_TTL};
pub use fallback::{GcPressure, GracefulFallback, ImpactAssessment};
pub use queue::{PriorityQueue, PriorityQueuing, QueuePoll, QueueTicket};
pub use recycle::{SmartRecycling, STRESS_GATE};

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::capacity::ShapeHint;
use crate::pool::Lease;
use crate::types::{Priority, ResourceKind};

/// A checkout request as seen by the overflow chain.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcquireRequest {
    /// Payload shape for capacity estimation
    pub shape: ShapeHint,
    /// Priority, if the caller opted into queueing
    pub priority: Option<Priority>,
    /// Queue timeout override
    pub timeout: Option<Duration>,
    /// Externally supplied stress level (0.0-1.0); gates recycling
    pub stress_level: f64,
}

impl AcquireRequest {
    pub fn new(shape: ShapeHint) -> Self {
        Self {
            shape,
            ..Default::default()
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_stress(mut self, stress_level: f64) -> Self {
        self.stress_level = stress_level;
        self
    }
}

/// What a strategy produced for the caller.
#[derive(Debug)]
pub enum OverflowOutcome {
    /// An object, ready to use
    Provided(Lease),
    /// Parked in the priority queue; poll the ticket
    Queued(QueueTicket),
}

/// Common per-strategy counters for the statistics payload.
#[derive(Debug, Clone, Serialize)]
pub struct StrategyMetrics {
    pub name: &'static str,
    /// Requests the strategy accepted
    pub attempts: u64,
    /// Requests it actually fulfilled
    pub fulfilled: u64,
    /// Strategy-specific gauges
    pub detail: Vec<(&'static str, f64)>,
}

/// One overflow policy.
///
/// `can_handle` is a cheap eligibility check; `handle` may still
/// decline by returning `None`, in which case the chain moves on.
pub trait OverflowStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn can_handle(&self, kind: ResourceKind, req: &AcquireRequest) -> bool;

    fn handle(&self, kind: ResourceKind, req: &AcquireRequest) -> Option<OverflowOutcome>;

    fn metrics(&self) -> StrategyMetrics;
}

/// The ordered strategy list.
///
/// Order is fixed at construction; the terminal strategy must accept
/// every request, which the coordinator guarantees by installing
/// fresh construction last.
pub struct OverflowChain {
    strategies: Vec<Arc<dyn OverflowStrategy>>,
}

impl OverflowChain {
    pub fn new(strategies: Vec<Arc<dyn OverflowStrategy>>) -> Self {
        Self { strategies }
    }

    /// Run the chain for an exhausted pool.
    pub fn run(&self, kind: ResourceKind, req: &AcquireRequest) -> OverflowOutcome {
        for strategy in &self.strategies {
            if !strategy.can_handle(kind, req) {
                continue;
            }
            if let Some(outcome) = strategy.handle(kind, req) {
                return outcome;
            }
        }
        unreachable!("terminal overflow strategy accepts every request")
    }

    /// Per-strategy metrics in chain order.
    pub fn metrics(&self) -> Vec<StrategyMetrics> {
        self.strategies.iter().map(|s| s.metrics()).collect()
    }
}
