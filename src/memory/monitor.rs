use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info};

use crate::memory::probe::MemoryProbe;
use crate::types::ResourceKind;

/// Ascending tier thresholds: 50 MB, 100 MB, 200 MB resident.
const TIER_THRESHOLDS: [u64; 3] = [
    50 * 1024 * 1024,
    100 * 1024 * 1024,
    200 * 1024 * 1024,
];

/// Discrete memory pressure level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryTier {
    Low,
    Medium,
    High,
    Critical,
}

impl MemoryTier {
    /// Map resident bytes to a tier. Monotonically non-decreasing in
    /// the sample.
    pub fn from_bytes(bytes: u64) -> Self {
        if bytes >= TIER_THRESHOLDS[2] {
            MemoryTier::Critical
        } else if bytes >= TIER_THRESHOLDS[1] {
            MemoryTier::High
        } else if bytes >= TIER_THRESHOLDS[0] {
            MemoryTier::Medium
        } else {
            MemoryTier::Low
        }
    }

    #[inline]
    fn rank(self) -> u8 {
        match self {
            MemoryTier::Low => 0,
            MemoryTier::Medium => 1,
            MemoryTier::High => 2,
            MemoryTier::Critical => 3,
        }
    }
}

/// Per-kind pool ceilings plus the auxiliary cache cap for one tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolSizeTable {
    pub message: usize,
    pub uri: usize,
    pub stream: usize,
    pub buffer: usize,
    pub aux_cache: usize,
}

impl PoolSizeTable {
    /// Size table for a tier. Ceilings shrink roughly 10x between
    /// `Low` and `Critical`.
    pub const fn for_tier(tier: MemoryTier) -> Self {
        match tier {
            MemoryTier::Low => PoolSizeTable {
                message: 100,
                uri: 300,
                stream: 200,
                buffer: 1000,
                aux_cache: 500,
            },
            MemoryTier::Medium => PoolSizeTable {
                message: 50,
                uri: 150,
                stream: 100,
                buffer: 500,
                aux_cache: 250,
            },
            MemoryTier::High => PoolSizeTable {
                message: 25,
                uri: 75,
                stream: 50,
                buffer: 250,
                aux_cache: 100,
            },
            MemoryTier::Critical => PoolSizeTable {
                message: 10,
                uri: 30,
                stream: 20,
                buffer: 100,
                aux_cache: 50,
            },
        }
    }

    /// Ceiling for one pooled kind.
    #[inline]
    pub fn for_kind(&self, kind: ResourceKind) -> usize {
        match kind {
            ResourceKind::Message => self.message,
            ResourceKind::Uri => self.uri,
            ResourceKind::Stream => self.stream,
            ResourceKind::Buffer => self.buffer,
        }
    }
}

/// Point-in-time view of the monitor for statistics output.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct MemorySnapshot {
    pub resident_bytes: u64,
    pub limit_bytes: u64,
    pub tier: MemoryTier,
    pub cleanup_cycles: u64,
}

#[derive(Debug)]
struct TierState {
    current: MemoryTier,
    /// Raw tier seen on the previous sample while it disagreed with
    /// `current`; a change is only accepted on confirmation.
    pending: Option<MemoryTier>,
}

/// Samples memory usage and derives the pressure tier.
///
/// Tier changes use hysteresis so a sample hovering at a threshold
/// boundary does not flap: a one-step change must be observed twice in
/// a row, while a jump of two or more tiers (and any move to
/// `Critical`) is accepted immediately.
pub struct MemoryPressureMonitor {
    probe: Arc<dyn MemoryProbe>,
    limit_bytes: u64,
    cleanup_threshold: f64,
    state: Mutex<TierState>,
    cleanup_cycles: AtomicU64,
}

impl MemoryPressureMonitor {
    pub fn new(probe: Arc<dyn MemoryProbe>, limit_bytes: u64, cleanup_threshold: f64) -> Self {
        let initial = MemoryTier::from_bytes(probe.resident_bytes());
        Self {
            probe,
            limit_bytes,
            cleanup_threshold,
            state: Mutex::new(TierState {
                current: initial,
                pending: None,
            }),
            cleanup_cycles: AtomicU64::new(0),
        }
    }

    /// Current resident bytes as reported by the probe.
    #[inline]
    pub fn resident_bytes(&self) -> u64 {
        self.probe.resident_bytes()
    }

    /// Configured memory ceiling.
    #[inline]
    pub fn limit_bytes(&self) -> u64 {
        self.limit_bytes
    }

    /// Sample the probe and return the (hysteresis-filtered) tier.
    pub fn current_tier(&self) -> MemoryTier {
        let raw = MemoryTier::from_bytes(self.probe.resident_bytes());
        let mut state = self.state.lock();

        if raw == state.current {
            state.pending = None;
            return state.current;
        }

        let jump = raw.rank().abs_diff(state.current.rank());
        let accept = raw == MemoryTier::Critical || jump >= 2 || state.pending == Some(raw);

        if accept {
            info!(from = ?state.current, to = ?raw, "memory tier changed");
            state.current = raw;
            state.pending = None;
        } else {
            debug!(observed = ?raw, current = ?state.current, "tier change pending confirmation");
            state.pending = Some(raw);
        }

        state.current
    }

    /// Pool size table for the current tier.
    pub fn optimal_pool_sizes(&self) -> PoolSizeTable {
        PoolSizeTable::for_tier(self.current_tier())
    }

    /// True when usage has crossed the cleanup fraction of the limit.
    pub fn needs_cleanup(&self) -> bool {
        let usage = self.probe.resident_bytes() as f64;
        usage / self.limit_bytes as f64 > self.cleanup_threshold
    }

    /// Record that a cleanup cycle ran.
    pub fn record_cleanup(&self) {
        self.cleanup_cycles.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of cleanup cycles recorded so far.
    pub fn cleanup_cycles(&self) -> u64 {
        self.cleanup_cycles.load(Ordering::Relaxed)
    }

    /// Reset counters and re-derive the tier from a fresh sample.
    pub fn reset(&self) {
        self.cleanup_cycles.store(0, Ordering::Relaxed);
        let mut state = self.state.lock();
        state.current = MemoryTier::from_bytes(self.probe.resident_bytes());
        state.pending = None;
    }

    /// Snapshot for statistics output.
    pub fn snapshot(&self) -> MemorySnapshot {
        MemorySnapshot {
            resident_bytes: self.probe.resident_bytes(),
            limit_bytes: self.limit_bytes,
            tier: self.current_tier(),
            cleanup_cycles: self.cleanup_cycles(),
        }
    }
}
