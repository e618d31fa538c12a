//! LRU + frequency-weighted eviction for auxiliary caches.
//!
//! Pools shrink through their tier ceilings; the caches around them
//! (header-name interning, precomputed operation entries) shrink
//! through this policy. Scoring favors evicting entries that are both
//! cold and rarely used; protected keys are spared while any other
//! candidate remains.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::types::Clock;

/// Score multiplier for protected keys.
const PROTECTED_SCALE: f64 = 0.1;

/// Fraction of entries removed by one smart-eviction pass.
const EVICT_FRACTION: usize = 5; // 1/5 = ~20%

/// Access record kept per tracked cache key.
#[derive(Debug, Clone, Copy)]
struct AccessRecord {
    last_access: Instant,
    frequency: u64,
    protected: bool,
}

impl AccessRecord {
    /// Higher score = more evictable.
    fn score(&self, now: Instant) -> f64 {
        let idle = now.saturating_duration_since(self.last_access).as_secs_f64();
        let base = idle / self.frequency.max(1) as f64;
        if self.protected {
            base * PROTECTED_SCALE
        } else {
            base
        }
    }
}

/// A key with its scoring inputs, as produced by victim selection.
#[derive(Debug, Clone)]
pub struct EvictionCandidate {
    pub key: Bytes,
    pub last_access: Instant,
    pub frequency: u64,
    pub protected: bool,
    pub score: f64,
}

/// Tracks access recency and frequency per cache key and selects
/// eviction victims.
#[derive(Debug, Default)]
pub struct EvictionPolicy {
    records: FxHashMap<Bytes, AccessRecord>,
}

impl EvictionPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one access, creating the record on first sight.
    pub fn record_access(&mut self, key: &Bytes, now: Instant) {
        self.records
            .entry(key.clone())
            .and_modify(|r| {
                r.last_access = now;
                r.frequency += 1;
            })
            .or_insert(AccessRecord {
                last_access: now,
                frequency: 1,
                protected: false,
            });
    }

    /// Mark a key protected; protected keys are spared while any
    /// unprotected candidate remains.
    pub fn protect(&mut self, key: &Bytes, now: Instant) {
        self.records
            .entry(key.clone())
            .and_modify(|r| r.protected = true)
            .or_insert(AccessRecord {
                last_access: now,
                frequency: 1,
                protected: true,
            });
    }

    /// Drop tracking for a key.
    pub fn forget(&mut self, key: &Bytes) {
        self.records.remove(key);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// All tracked keys scored, most evictable first.
    pub fn candidates(&self, now: Instant) -> Vec<EvictionCandidate> {
        let mut out: Vec<EvictionCandidate> = self
            .records
            .iter()
            .map(|(key, r)| EvictionCandidate {
                key: key.clone(),
                last_access: r.last_access,
                frequency: r.frequency,
                protected: r.protected,
                score: r.score(now),
            })
            .collect();
        out.sort_by(|a, b| b.score.total_cmp(&a.score));
        out
    }

    /// Pick up to `count` victims, most evictable first. Protected
    /// keys are only chosen once every unprotected key is gone.
    pub fn select_victims(&self, now: Instant, count: usize) -> Vec<Bytes> {
        let candidates = self.candidates(now);
        let mut victims: Vec<Bytes> = candidates
            .iter()
            .filter(|c| !c.protected)
            .take(count)
            .map(|c| c.key.clone())
            .collect();

        if victims.len() < count {
            victims.extend(
                candidates
                    .iter()
                    .filter(|c| c.protected)
                    .take(count - victims.len())
                    .map(|c| c.key.clone()),
            );
        }
        victims
    }
}

/// Bulk eviction for caches without access tracking: keep protected
/// keys plus the first half of the remaining capacity, drop the rest.
/// Returns the number of evicted entries.
pub fn bulk_evict<V>(
    entries: &mut FxHashMap<Bytes, V>,
    protected: &FxHashSet<Bytes>,
    cap: usize,
) -> usize {
    if entries.len() <= cap {
        return 0;
    }

    let protected_kept = entries.keys().filter(|k| protected.contains(*k)).count();
    let keep_others = cap.saturating_sub(protected_kept) / 2;

    let mut kept = 0;
    let before = entries.len();
    entries.retain(|k, _| {
        if protected.contains(k) {
            return true;
        }
        if kept < keep_others {
            kept += 1;
            return true;
        }
        false
    });
    before - entries.len()
}

/// Bounded header-name interning cache.
///
/// Interning returns a shared `Bytes` for a header name so repeated
/// headers across messages alias one allocation. Bounded by the
/// auxiliary-cache cap of the current memory tier; overflow triggers a
/// smart-eviction pass.
pub struct HeaderCache {
    inner: Mutex<HeaderInner>,
    clock: Arc<dyn Clock>,
    evictions: AtomicU64,
}

struct HeaderInner {
    entries: FxHashMap<Bytes, Bytes>,
    policy: EvictionPolicy,
    cap: usize,
}

impl HeaderCache {
    pub fn new(cap: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(HeaderInner {
                entries: FxHashMap::default(),
                policy: EvictionPolicy::new(),
                cap,
            }),
            clock,
            evictions: AtomicU64::new(0),
        }
    }

    /// Intern a header name, returning the canonical shared bytes.
    pub fn intern(&self, name: &[u8]) -> Bytes {
        let now = self.clock.now();
        let mut inner = self.inner.lock();

        if let Some(canonical) = inner.entries.get(name).cloned() {
            inner.policy.record_access(&canonical, now);
            return canonical;
        }

        let canonical = Bytes::copy_from_slice(name);
        inner
            .entries
            .insert(canonical.clone(), canonical.clone());
        inner.policy.record_access(&canonical, now);

        if inner.entries.len() > inner.cap {
            let evicted = Self::smart_evict(&mut inner, now);
            self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
        }

        canonical
    }

    /// Mark a name protected (and intern it if new).
    pub fn protect(&self, name: &[u8]) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();

        let canonical = match inner.entries.get(name).cloned() {
            Some(c) => c,
            None => {
                let c = Bytes::copy_from_slice(name);
                inner.entries.insert(c.clone(), c.clone());
                c
            }
        };
        inner.policy.protect(&canonical, now);
    }

    /// Remove the most evictable ~20% of entries.
    fn smart_evict(inner: &mut HeaderInner, now: Instant) -> usize {
        let count = (inner.entries.len() / EVICT_FRACTION).max(1);
        let victims = inner.policy.select_victims(now, count);
        for key in &victims {
            inner.entries.remove(key);
            inner.policy.forget(key);
        }
        victims.len()
    }

    /// True if the name is currently interned.
    pub fn contains(&self, name: &[u8]) -> bool {
        self.inner.lock().entries.contains_key(name)
    }

    /// Adjust the cap to the current tier's auxiliary cache size.
    /// Shrinking evicts immediately.
    pub fn set_cap(&self, cap: usize) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.cap = cap;
        while inner.entries.len() > inner.cap {
            let evicted = Self::smart_evict(&mut inner, now);
            self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
            if evicted == 0 {
                break;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Total entries evicted over the cache's lifetime.
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Drop every entry and all tracking state.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.policy.clear();
    }

    /// Reset eviction counters (test isolation).
    pub fn reset_counters(&self) {
        self.evictions.store(0, Ordering::Relaxed);
    }
}

/// Bounded cache of precomputed operation entries, trimmed by bulk
/// eviction (no per-key access tracking).
pub struct OpsCache {
    inner: Mutex<OpsInner>,
    evictions: AtomicU64,
}

struct OpsInner {
    entries: FxHashMap<Bytes, Bytes>,
    protected: FxHashSet<Bytes>,
    cap: usize,
}

impl OpsCache {
    pub fn new(cap: usize) -> Self {
        Self {
            inner: Mutex::new(OpsInner {
                entries: FxHashMap::default(),
                protected: FxHashSet::default(),
                cap,
            }),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn insert(&self, key: Bytes, value: Bytes) {
        let mut inner = self.inner.lock();
        inner.entries.insert(key, value);
        if inner.entries.len() > inner.cap {
            let OpsInner {
                entries,
                protected,
                cap,
            } = &mut *inner;
            let evicted = bulk_evict(entries, protected, *cap);
            self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
        }
    }

    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        self.inner.lock().entries.get(key).cloned()
    }

    /// Protect a key from bulk eviction.
    pub fn protect(&self, key: Bytes) {
        self.inner.lock().protected.insert(key);
    }

    pub fn set_cap(&self, cap: usize) {
        let mut inner = self.inner.lock();
        inner.cap = cap;
        if inner.entries.len() > inner.cap {
            let OpsInner {
                entries,
                protected,
                cap,
            } = &mut *inner;
            let evicted = bulk_evict(entries, protected, *cap);
            self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    pub fn clear(&self) {
        self.inner.lock().entries.clear();
    }

    pub fn reset_counters(&self) {
        self.evictions.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ManualClock;
    use std::time::Duration;

    fn key(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    #[test]
    fn test_score_decays_with_frequency() {
        let clock = ManualClock::new();
        let mut policy = EvictionPolicy::new();

        let hot = key("hot");
        let cold = key("cold");
        policy.record_access(&cold, clock.now());
        for _ in 0..10 {
            policy.record_access(&hot, clock.now());
        }

        clock.advance(Duration::from_secs(100));
        let candidates = policy.candidates(clock.now());
        // Cold key scores higher (more evictable) than the hot one.
        assert_eq!(candidates[0].key, cold);
        assert!(candidates[0].score > candidates[1].score);
    }

    #[test]
    fn test_protected_scale() {
        let clock = ManualClock::new();
        let mut policy = EvictionPolicy::new();

        let a = key("a");
        let b = key("b");
        policy.record_access(&a, clock.now());
        policy.record_access(&b, clock.now());
        policy.protect(&b, clock.now());

        clock.advance(Duration::from_secs(100));
        let candidates = policy.candidates(clock.now());
        let score_a = candidates.iter().find(|c| c.key == a).unwrap().score;
        let score_b = candidates.iter().find(|c| c.key == b).unwrap().score;
        assert!((score_b - score_a * 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_victims_spare_protected() {
        let clock = ManualClock::new();
        let mut policy = EvictionPolicy::new();

        // Protected key is the coldest entry; it must still survive
        // while unprotected candidates remain.
        let shielded = key("shielded");
        policy.protect(&shielded, clock.now());
        clock.advance(Duration::from_secs(1000));
        for i in 0..10 {
            policy.record_access(&key(&format!("k{}", i)), clock.now());
        }

        let victims = policy.select_victims(clock.now(), 10);
        assert_eq!(victims.len(), 10);
        assert!(!victims.contains(&shielded));
    }

    #[test]
    fn test_victims_fall_back_to_protected_when_alone() {
        let clock = ManualClock::new();
        let mut policy = EvictionPolicy::new();
        let only = key("only");
        policy.protect(&only, clock.now());

        let victims = policy.select_victims(clock.now(), 1);
        assert_eq!(victims, vec![only]);
    }

    #[test]
    fn test_bulk_evict_keeps_protected_and_half() {
        let mut entries: FxHashMap<Bytes, Bytes> = FxHashMap::default();
        let mut protected: FxHashSet<Bytes> = FxHashSet::default();

        for i in 0..20 {
            entries.insert(key(&format!("k{}", i)), key("v"));
        }
        protected.insert(key("k0"));
        protected.insert(key("k1"));

        let evicted = bulk_evict(&mut entries, &protected, 10);
        // 2 protected + (10 - 2) / 2 = 4 others survive.
        assert_eq!(entries.len(), 6);
        assert_eq!(evicted, 14);
        assert!(entries.contains_key(&key("k0")));
        assert!(entries.contains_key(&key("k1")));
    }

    #[test]
    fn test_bulk_evict_noop_under_cap() {
        let mut entries: FxHashMap<Bytes, Bytes> = FxHashMap::default();
        entries.insert(key("a"), key("v"));
        assert_eq!(bulk_evict(&mut entries, &FxHashSet::default(), 10), 0);
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_header_cache_interns() {
        let cache = HeaderCache::new(100, Arc::new(ManualClock::new()));
        let a = cache.intern(b"content-type");
        let b = cache.intern(b"content-type");
        // Same backing storage, not just equal bytes.
        assert_eq!(a.as_ptr(), b.as_ptr());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_header_cache_overflow_evicts_about_a_fifth() {
        let clock = Arc::new(ManualClock::new());
        let cache = HeaderCache::new(10, clock.clone());

        for i in 0..10 {
            cache.intern(format!("x-header-{}", i).as_bytes());
            clock.advance(Duration::from_secs(1));
        }
        assert_eq!(cache.len(), 10);

        cache.intern(b"x-header-overflow");
        // 11 entries over a cap of 10: one pass removes 11/5 = 2.
        assert_eq!(cache.len(), 9);
        assert_eq!(cache.evictions(), 2);
    }

    #[test]
    fn test_frequent_protected_header_survives_overflow() {
        let clock = Arc::new(ManualClock::new());
        let cache = HeaderCache::new(8, clock.clone());
        cache.protect(b"Content-Type");

        // Register Content-Type far more often than any other key
        // while churning enough one-shot names to overflow the cap.
        for i in 0..50 {
            for _ in 0..5 {
                cache.intern(b"Content-Type");
            }
            cache.intern(format!("x-rare-{}", i).as_bytes());
            clock.advance(Duration::from_secs(1));
        }

        assert!(cache.evictions() > 0);
        assert!(cache.contains(b"Content-Type"));
        assert!(cache.len() <= 9);
    }

    #[test]
    fn test_header_cache_shrink_cap() {
        let clock = Arc::new(ManualClock::new());
        let cache = HeaderCache::new(100, clock.clone());
        for i in 0..40 {
            cache.intern(format!("h{}", i).as_bytes());
            clock.advance(Duration::from_millis(10));
        }

        cache.set_cap(10);
        assert!(cache.len() <= 10);
    }

    #[test]
    fn test_ops_cache_bulk_trims() {
        let cache = OpsCache::new(10);
        cache.protect(key("GET /health"));
        cache.insert(key("GET /health"), key("ok"));
        for i in 0..15 {
            cache.insert(key(&format!("GET /v{}", i)), key("payload"));
        }

        assert!(cache.len() <= 10);
        assert!(cache.evictions() > 0);
        assert!(cache.get(b"GET /health").is_some());
    }
}
