//! Lock-free latency histogram for p50/p95/p99 percentile tracking.
//!
//! Tracks object construction latencies, which live in the
//! nanoseconds-to-low-milliseconds range, with piecewise-linear
//! buckets for memory efficiency.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::metrics::LatencyPercentiles;

/// Number of buckets in the histogram.
/// Covers sub-microsecond up to ~2 ms with piecewise-linear scaling.
const NUM_BUCKETS: usize = 48;

/// Latency histogram with piecewise-linear buckets.
///
/// Bucket boundaries (values in nanoseconds):
/// - Buckets 0-15: 1 microsecond resolution (0-16 us)
/// - Buckets 16-31: 16 microsecond resolution (16-272 us)
/// - Buckets 32-47: 128 microsecond resolution (272 us-2.3 ms, last bucket overflows)
pub struct LatencyHistogram {
    buckets: [AtomicU64; NUM_BUCKETS],
    count: AtomicU64,
    max: AtomicU64,
}

impl LatencyHistogram {
    /// Create a new empty histogram.
    pub fn new() -> Self {
        Self {
            buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            count: AtomicU64::new(0),
            max: AtomicU64::new(0),
        }
    }

    /// Record a latency value in nanoseconds.
    #[inline]
    pub fn record(&self, value_ns: u64) {
        let bucket = Self::value_to_bucket(value_ns);
        self.buckets[bucket].fetch_add(1, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);

        // Update max using CAS loop
        let mut current_max = self.max.load(Ordering::Relaxed);
        while value_ns > current_max {
            match self.max.compare_exchange_weak(
                current_max,
                value_ns,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current_max = actual,
            }
        }
    }

    /// Map a latency value to a bucket index.
    #[inline]
    fn value_to_bucket(value_ns: u64) -> usize {
        if value_ns < 16_000 {
            // Buckets 0-15: 1us resolution
            (value_ns / 1_000) as usize
        } else if value_ns < 272_000 {
            // Buckets 16-31: 16us resolution
            16 + ((value_ns - 16_000) / 16_000) as usize
        } else if value_ns < 2_320_000 {
            // Buckets 32-47: 128us resolution
            32 + ((value_ns - 272_000) / 128_000) as usize
        } else {
            // Overflow bucket
            NUM_BUCKETS - 1
        }
    }

    /// Map a bucket index back to its lower bound value.
    /// An approximation: the returned value maps back to the same bucket.
    #[inline]
    fn bucket_to_value(bucket: usize) -> u64 {
        if bucket < 16 {
            bucket as u64 * 1_000
        } else if bucket < 32 {
            16_000 + (bucket - 16) as u64 * 16_000
        } else {
            272_000 + (bucket - 32) as u64 * 128_000
        }
    }

    /// Get total count of recorded values.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Calculate p50, p95, p99 percentiles.
    pub fn percentiles(&self) -> LatencyPercentiles {
        let total = self.count.load(Ordering::Relaxed);
        if total == 0 {
            return LatencyPercentiles::default();
        }

        let p50_target = total / 2;
        let p95_target = total * 95 / 100;
        let p99_target = total * 99 / 100;

        let mut cumulative = 0u64;
        let mut p50 = 0u64;
        let mut p95 = 0u64;
        let mut p99 = 0u64;

        for (bucket_idx, bucket) in self.buckets.iter().enumerate() {
            cumulative += bucket.load(Ordering::Relaxed);

            if p50 == 0 && cumulative >= p50_target {
                p50 = Self::bucket_to_value(bucket_idx);
            }
            if p95 == 0 && cumulative >= p95_target {
                p95 = Self::bucket_to_value(bucket_idx);
            }
            if p99 == 0 && cumulative >= p99_target {
                p99 = Self::bucket_to_value(bucket_idx);
            }
        }

        LatencyPercentiles {
            count: total,
            p50_ns: p50,
            p95_ns: p95,
            p99_ns: p99,
            max_ns: self.max.load(Ordering::Relaxed),
        }
    }

    /// Reset all buckets to zero.
    pub fn reset(&self) {
        for bucket in &self.buckets {
            bucket.store(0, Ordering::Relaxed);
        }
        self.count.store(0, Ordering::Relaxed);
        self.max.store(0, Ordering::Relaxed);
    }
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new()
    }
}
