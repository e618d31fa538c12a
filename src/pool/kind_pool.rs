use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::Serialize;

use crate::pool::object::PooledObject;
use crate::types::{Resource, ResourceKind};

/// Relaxed ordering for counters (eventual visibility is fine for stats).
const RELAXED: Ordering = Ordering::Relaxed;

/// Result of a pool checkout attempt.
#[derive(Debug)]
pub enum PoolAcquire {
    /// Served from the availability list
    Reused(PooledObject),
    /// Constructed fresh below the ceiling (a pool miss)
    Created(PooledObject),
    /// At the ceiling with nothing available; the overflow chain runs
    Exhausted,
}

#[derive(Debug, Default)]
struct PoolInner {
    /// Availability lists keyed by power-of-two capacity bucket
    buckets: FxHashMap<usize, Vec<PooledObject>>,
    /// Objects currently checked out
    issued: usize,
    /// High-water mark of `issued`
    peak_issued: usize,
}

impl PoolInner {
    fn available_total(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }
}

/// Pool of reusable objects of one kind.
///
/// The availability lists and the issued count live under one lock so
/// the ceiling check and the construction decision are atomic; stats
/// counters are lock-free.
pub struct KindPool {
    kind: ResourceKind,
    inner: Mutex<PoolInner>,
    hits: AtomicU64,
    misses: AtomicU64,
    releases: AtomicU64,
    drops: AtomicU64,
    expired: AtomicU64,
}

impl KindPool {
    pub fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            inner: Mutex::new(PoolInner::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            releases: AtomicU64::new(0),
            drops: AtomicU64::new(0),
            expired: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Check an object out of the bucket, or construct one below the
    /// ceiling. Expired objects found on the list are discarded, never
    /// reissued.
    pub fn acquire(
        &self,
        bucket: usize,
        max_size: usize,
        ttl: Option<Duration>,
        now: Instant,
        next_id: &AtomicU64,
    ) -> PoolAcquire {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        if let Some(list) = inner.buckets.get_mut(&bucket) {
            while let Some(mut obj) = list.pop() {
                if obj.is_expired(now) {
                    self.expired.fetch_add(1, RELAXED);
                    continue;
                }
                obj.reset();
                obj.touch(now);
                inner.issued += 1;
                inner.peak_issued = inner.peak_issued.max(inner.issued);
                self.hits.fetch_add(1, RELAXED);
                return PoolAcquire::Reused(obj);
            }
        }

        if inner.issued < max_size {
            let id = next_id.fetch_add(1, RELAXED);
            let mut obj = PooledObject::new(
                id,
                Resource::with_capacity(self.kind, bucket),
                bucket,
                now,
                ttl,
            );
            obj.touch(now);
            inner.issued += 1;
            inner.peak_issued = inner.peak_issued.max(inner.issued);
            self.misses.fetch_add(1, RELAXED);
            return PoolAcquire::Created(obj);
        }

        PoolAcquire::Exhausted
    }

    /// Return a checked-out object. Re-enqueued if its bucket has room
    /// under the ceiling and it has not expired, dropped otherwise.
    pub fn release(&self, mut obj: PooledObject, max_size: usize, now: Instant) {
        let mut inner = self.inner.lock();
        inner.issued = inner.issued.saturating_sub(1);

        if obj.is_expired(now) {
            self.expired.fetch_add(1, RELAXED);
            return;
        }

        let bucket = obj.bucket();
        let list = inner.buckets.entry(bucket).or_default();
        if list.len() < max_size {
            obj.reset();
            list.push(obj);
            self.releases.fetch_add(1, RELAXED);
        } else {
            self.drops.fetch_add(1, RELAXED);
        }
    }

    /// Register a checkout created outside the normal acquire path
    /// (recycler reassignment).
    pub fn note_issued(&self) {
        let mut inner = self.inner.lock();
        inner.issued += 1;
        inner.peak_issued = inner.peak_issued.max(inner.issued);
    }

    /// Forget a checkout whose object left the engine (`Lease::take`).
    pub fn forget_issued(&self) {
        let mut inner = self.inner.lock();
        inner.issued = inner.issued.saturating_sub(1);
    }

    /// Pre-populate a bucket with fresh objects, staying under the
    /// ceiling. Returns how many were added.
    pub fn preload(
        &self,
        count: usize,
        bucket: usize,
        max_size: usize,
        ttl: Option<Duration>,
        now: Instant,
        next_id: &AtomicU64,
    ) -> usize {
        let mut inner = self.inner.lock();
        let list = inner.buckets.entry(bucket).or_default();
        let room = max_size.saturating_sub(list.len());
        let adding = count.min(room);
        for _ in 0..adding {
            let id = next_id.fetch_add(1, RELAXED);
            list.push(PooledObject::new(
                id,
                Resource::with_capacity(self.kind, bucket),
                bucket,
                now,
                ttl,
            ));
        }
        adding
    }

    /// Timestamp of the least-recently-used available object.
    pub fn peek_lru(&self) -> Option<Instant> {
        let inner = self.inner.lock();
        inner
            .buckets
            .values()
            .flat_map(|list| list.iter())
            .map(|obj| obj.last_used())
            .min()
    }

    /// Remove and return the least-recently-used available object.
    pub fn pop_lru(&self) -> Option<PooledObject> {
        let mut inner = self.inner.lock();

        let (&bucket, idx) = inner
            .buckets
            .iter()
            .flat_map(|(bucket, list)| {
                list.iter()
                    .enumerate()
                    .map(move |(idx, obj)| ((bucket, idx), obj.last_used()))
            })
            .min_by_key(|(_, last_used)| *last_used)
            .map(|(pos, _)| pos)?;

        Some(inner.buckets.get_mut(&bucket)?.remove(idx))
    }

    /// Drop expired objects from every bucket. Returns the count and
    /// estimated bytes reclaimed.
    pub fn sweep_expired(&self, now: Instant) -> (usize, u64) {
        let mut inner = self.inner.lock();
        let mut count = 0;
        let mut bytes = 0u64;
        for list in inner.buckets.values_mut() {
            list.retain(|obj| {
                if obj.is_expired(now) {
                    count += 1;
                    bytes += obj.approx_bytes() as u64;
                    false
                } else {
                    true
                }
            });
        }
        self.expired.fetch_add(count as u64, RELAXED);
        (count, bytes)
    }

    /// Trim every bucket down to the given ceiling (tier shrink).
    /// Evicted objects are never re-added. Returns count and bytes.
    pub fn shrink_to(&self, max_size: usize) -> (usize, u64) {
        let mut inner = self.inner.lock();
        let mut count = 0;
        let mut bytes = 0u64;
        for list in inner.buckets.values_mut() {
            while list.len() > max_size {
                if let Some(obj) = list.pop() {
                    count += 1;
                    bytes += obj.approx_bytes() as u64;
                }
            }
        }
        self.drops.fetch_add(count as u64, RELAXED);
        (count, bytes)
    }

    /// Drop all available objects and zero the issued count.
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock();
        let count = inner.available_total();
        inner.buckets.clear();
        inner.issued = 0;
        inner.peak_issued = 0;
        count
    }

    /// Zero the stats counters (test isolation).
    pub fn reset_counters(&self) {
        self.hits.store(0, RELAXED);
        self.misses.store(0, RELAXED);
        self.releases.store(0, RELAXED);
        self.drops.store(0, RELAXED);
        self.expired.store(0, RELAXED);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(RELAXED)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(RELAXED)
    }

    pub fn issued(&self) -> usize {
        self.inner.lock().issued
    }

    pub fn available_total(&self) -> usize {
        self.inner.lock().available_total()
    }

    /// Number of available objects in one bucket.
    pub fn available_in(&self, bucket: usize) -> usize {
        self.inner
            .lock()
            .buckets
            .get(&bucket)
            .map_or(0, Vec::len)
    }

    /// Point-in-time stats snapshot.
    pub fn snapshot(&self) -> PoolStatsSnapshot {
        let inner = self.inner.lock();
        let hits = self.hits.load(RELAXED);
        let misses = self.misses.load(RELAXED);
        let checkouts = hits + misses;
        let reuse_rate_pct = if checkouts == 0 {
            0.0
        } else {
            hits as f64 / checkouts as f64 * 100.0
        };

        let mut buckets: Vec<BucketSnapshot> = inner
            .buckets
            .iter()
            .map(|(&capacity, list)| BucketSnapshot {
                capacity,
                available: list.len(),
            })
            .collect();
        buckets.sort_by_key(|b| b.capacity);

        PoolStatsSnapshot {
            kind: self.kind,
            hits,
            misses,
            releases: self.releases.load(RELAXED),
            drops: self.drops.load(RELAXED),
            expired: self.expired.load(RELAXED),
            issued: inner.issued,
            peak_issued: inner.peak_issued,
            buckets,
            reuse_rate_pct,
        }
    }
}

/// Availability of one capacity bucket.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct BucketSnapshot {
    pub capacity: usize,
    pub available: usize,
}

/// Stats snapshot of one kind's pool.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStatsSnapshot {
    pub kind: ResourceKind,
    pub hits: u64,
    pub misses: u64,
    pub releases: u64,
    pub drops: u64,
    pub expired: u64,
    pub issued: usize,
    pub peak_issued: usize,
    pub buckets: Vec<BucketSnapshot>,
    pub reuse_rate_pct: f64,
}

impl PoolStatsSnapshot {
    /// Total available objects across buckets.
    pub fn available_total(&self) -> usize {
        self.buckets.iter().map(|b| b.available).sum()
    }
}
