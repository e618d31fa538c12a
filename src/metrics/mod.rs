//! Statistics types for the pooling engine.
//!
//! Counters live with the components that own them (pools, caches,
//! overflow strategies, the pressure monitor); this module defines the
//! serializable point-in-time snapshot the coordinator assembles for
//! an operations endpoint, plus an INFO-style text rendering.

mod histogram;

pub use histogram::LatencyHistogram;

use serde::Serialize;

use crate::memory::MemorySnapshot;
use crate::overflow::StrategyMetrics;
use crate::pool::PoolStatsSnapshot;

/// Latency percentiles in nanoseconds.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct LatencyPercentiles {
    pub count: u64,
    pub p50_ns: u64,
    pub p95_ns: u64,
    pub p99_ns: u64,
    pub max_ns: u64,
}

/// Engine-wide counter totals summed across pools.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PoolTotals {
    pub hits: u64,
    pub misses: u64,
    pub releases: u64,
    pub drops: u64,
    pub expired: u64,
    /// Checkouts satisfied by reuse, as a percentage of all checkouts
    /// (reuses / (reuses + allocations) * 100).
    pub reuse_rate_pct: f64,
}

/// Auxiliary cache occupancy and eviction counts.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CacheStats {
    pub header_entries: usize,
    pub header_evictions: u64,
    pub ops_entries: usize,
    pub ops_evictions: u64,
}

/// Point-in-time snapshot of the whole engine.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub pools: Vec<PoolStatsSnapshot>,
    pub totals: PoolTotals,
    pub memory: MemorySnapshot,
    pub caches: CacheStats,
    pub overflow: Vec<StrategyMetrics>,
    pub queue_depth: usize,
    pub fallback_latency: LatencyPercentiles,
}

impl EngineStats {
    /// Format as INFO-style output, optionally filtered to a section
    /// (`pools`, `memory`, `caches`, `overflow`).
    pub fn to_info_string(&self, section: Option<&str>) -> String {
        let mut out = String::with_capacity(2048);

        let include_all = section.is_none();
        let section = section.unwrap_or("");

        if include_all || section.eq_ignore_ascii_case("pools") {
            out.push_str("# Pools\r\n");
            out.push_str(&format!("pool_hits:{}\r\n", self.totals.hits));
            out.push_str(&format!("pool_misses:{}\r\n", self.totals.misses));
            out.push_str(&format!("pool_releases:{}\r\n", self.totals.releases));
            out.push_str(&format!("pool_drops:{}\r\n", self.totals.drops));
            out.push_str(&format!("pool_expired:{}\r\n", self.totals.expired));
            out.push_str(&format!(
                "reuse_rate_pct:{:.1}\r\n",
                self.totals.reuse_rate_pct
            ));
            for pool in &self.pools {
                out.push_str(&format!(
                    "{}_issued:{}\r\n",
                    pool.kind.as_str(),
                    pool.issued
                ));
                out.push_str(&format!(
                    "{}_peak_issued:{}\r\n",
                    pool.kind.as_str(),
                    pool.peak_issued
                ));
                out.push_str(&format!(
                    "{}_available:{}\r\n",
                    pool.kind.as_str(),
                    pool.available_total()
                ));
            }
            out.push_str("\r\n");
        }

        if include_all || section.eq_ignore_ascii_case("memory") {
            out.push_str("# Memory\r\n");
            out.push_str(&format!(
                "resident_bytes:{}\r\n",
                self.memory.resident_bytes
            ));
            out.push_str(&format!("limit_bytes:{}\r\n", self.memory.limit_bytes));
            out.push_str(&format!(
                "tier:{}\r\n",
                format!("{:?}", self.memory.tier).to_lowercase()
            ));
            out.push_str(&format!(
                "cleanup_cycles:{}\r\n",
                self.memory.cleanup_cycles
            ));
            out.push_str("\r\n");
        }

        if include_all || section.eq_ignore_ascii_case("caches") {
            out.push_str("# Caches\r\n");
            out.push_str(&format!(
                "header_cache_entries:{}\r\n",
                self.caches.header_entries
            ));
            out.push_str(&format!(
                "header_cache_evictions:{}\r\n",
                self.caches.header_evictions
            ));
            out.push_str(&format!(
                "ops_cache_entries:{}\r\n",
                self.caches.ops_entries
            ));
            out.push_str(&format!(
                "ops_cache_evictions:{}\r\n",
                self.caches.ops_evictions
            ));
            out.push_str("\r\n");
        }

        if include_all || section.eq_ignore_ascii_case("overflow") {
            out.push_str("# Overflow\r\n");
            out.push_str(&format!("queue_depth:{}\r\n", self.queue_depth));
            for strategy in &self.overflow {
                out.push_str(&format!(
                    "{}_attempts:{}\r\n",
                    strategy.name, strategy.attempts
                ));
                out.push_str(&format!(
                    "{}_fulfilled:{}\r\n",
                    strategy.name, strategy.fulfilled
                ));
                for (gauge, value) in &strategy.detail {
                    out.push_str(&format!("{}_{}:{}\r\n", strategy.name, gauge, value));
                }
            }
            out.push_str(&format!(
                "fallback_latency_p50_ns:{}\r\n",
                self.fallback_latency.p50_ns
            ));
            out.push_str(&format!(
                "fallback_latency_p99_ns:{}\r\n",
                self.fallback_latency.p99_ns
            ));
            out.push_str("\r\n");
        }

        out
    }
}
