use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::overflow::ElasticLedger;
use crate::pool::PoolRegistry;
use crate::types::{Resettable, Resource, ResourceKind};

/// A reusable resource plus its pooling metadata.
///
/// Exactly one holder owns a `PooledObject` at any time: either a
/// pool's availability list, the recycler's standby table, or a caller
/// through a [`Lease`].
#[derive(Debug)]
pub struct PooledObject {
    id: u64,
    resource: Resource,
    /// Bucket the object was created for; capacity may drift as the
    /// payload grows, the bucket key does not.
    bucket: usize,
    created_at: Instant,
    last_used: Instant,
    use_count: u64,
    ttl: Option<Duration>,
    recyclable: bool,
    idle: bool,
}

impl PooledObject {
    pub fn new(
        id: u64,
        resource: Resource,
        bucket: usize,
        now: Instant,
        ttl: Option<Duration>,
    ) -> Self {
        Self {
            id,
            resource,
            bucket,
            created_at: now,
            last_used: now,
            use_count: 0,
            ttl,
            recyclable: true,
            idle: false,
        }
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn kind(&self) -> ResourceKind {
        self.resource.kind()
    }

    #[inline]
    pub fn bucket(&self) -> usize {
        self.bucket
    }

    #[inline]
    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    #[inline]
    pub fn resource_mut(&mut self) -> &mut Resource {
        &mut self.resource
    }

    /// Unwrap the resource, discarding metadata.
    pub fn into_resource(self) -> Resource {
        self.resource
    }

    /// Record a checkout: bumps the use count and refreshes recency.
    pub fn touch(&mut self, now: Instant) {
        self.last_used = now;
        self.use_count += 1;
        self.idle = false;
    }

    /// Idle time since the last checkout.
    pub fn idle_time(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_used)
    }

    /// Time since construction.
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created_at)
    }

    /// True once the object has sat unused past its TTL.
    pub fn is_expired(&self, now: Instant) -> bool {
        match self.ttl {
            Some(ttl) => self.idle_time(now) >= ttl,
            None => false,
        }
    }

    #[inline]
    pub fn use_count(&self) -> u64 {
        self.use_count
    }

    #[inline]
    pub fn last_used(&self) -> Instant {
        self.last_used
    }

    #[inline]
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    pub fn set_ttl(&mut self, ttl: Option<Duration>) {
        self.ttl = ttl;
    }

    #[inline]
    pub fn recyclable(&self) -> bool {
        self.recyclable
    }

    pub fn set_recyclable(&mut self, recyclable: bool) {
        self.recyclable = recyclable;
    }

    #[inline]
    pub fn is_idle(&self) -> bool {
        self.idle
    }

    /// Flag the object as voluntarily idle (surrendered by its holder).
    pub fn mark_idle(&mut self) {
        self.idle = true;
    }

    /// Clear payload content, keeping capacity.
    pub fn reset(&mut self) {
        self.resource.reset();
    }

    /// Approximate retained bytes.
    pub fn approx_bytes(&self) -> usize {
        self.resource.approx_bytes()
    }
}

/// Where a leased object came from, deciding its return path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseOrigin {
    /// Checked out of a pool; returns to it on release
    Pooled,
    /// Created past the nominal ceiling; untracked on release
    Elastic(u64),
    /// Unpooled fresh construction; dropped on release
    Fallback,
    /// Reassigned by the recycler; returns to its kind's pool
    Recycled,
}

/// Exclusive checkout handle.
///
/// The lease owns the object until released; dropping it returns the
/// object along its origin's path. `take` keeps the resource and
/// severs it from the engine.
pub struct Lease {
    obj: Option<PooledObject>,
    origin: LeaseOrigin,
    registry: Arc<PoolRegistry>,
    elastic: Option<Arc<ElasticLedger>>,
}

impl Lease {
    pub(crate) fn new(
        obj: PooledObject,
        origin: LeaseOrigin,
        registry: Arc<PoolRegistry>,
        elastic: Option<Arc<ElasticLedger>>,
    ) -> Self {
        Self {
            obj: Some(obj),
            origin,
            registry,
            elastic,
        }
    }

    #[inline]
    pub fn origin(&self) -> LeaseOrigin {
        self.origin
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.object().id()
    }

    #[inline]
    pub fn kind(&self) -> ResourceKind {
        self.object().kind()
    }

    #[inline]
    fn object(&self) -> &PooledObject {
        self.obj.as_ref().expect("lease object present until drop")
    }

    /// Release bookkeeping without returning the object anywhere.
    fn sever(&mut self) -> Option<PooledObject> {
        let obj = self.obj.take()?;
        match self.origin {
            LeaseOrigin::Pooled | LeaseOrigin::Recycled => {
                self.registry.forget_issued(obj.kind());
            }
            LeaseOrigin::Elastic(id) => {
                if let Some(ledger) = &self.elastic {
                    ledger.untrack(id);
                }
            }
            LeaseOrigin::Fallback => {}
        }
        Some(obj)
    }

    /// Take the resource out of the engine, preventing reuse.
    pub fn take(mut self) -> Resource {
        match self.sever() {
            Some(obj) => obj.into_resource(),
            None => unreachable!("lease consumed twice"),
        }
    }

    /// Detach the object with metadata intact (recycler surrender).
    pub(crate) fn into_object(mut self) -> Option<PooledObject> {
        self.sever()
    }
}

impl std::ops::Deref for Lease {
    type Target = Resource;

    fn deref(&self) -> &Self::Target {
        self.obj
            .as_ref()
            .expect("lease object present until drop")
            .resource()
    }
}

impl std::ops::DerefMut for Lease {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.obj
            .as_mut()
            .expect("lease object present until drop")
            .resource_mut()
    }
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("origin", &self.origin)
            .field("kind", &self.obj.as_ref().map(|o| o.kind()))
            .field("id", &self.obj.as_ref().map(|o| o.id()))
            .finish()
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Some(obj) = self.obj.take() {
            match self.origin {
                LeaseOrigin::Pooled | LeaseOrigin::Recycled => {
                    self.registry.give_back(obj);
                }
                LeaseOrigin::Elastic(id) => {
                    if let Some(ledger) = &self.elastic {
                        ledger.untrack(id);
                    }
                    // Elastic objects exist past the ceiling; they are
                    // not re-pooled.
                }
                LeaseOrigin::Fallback => {
                    // Unpooled; the allocation simply ends here.
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn object(ttl: Option<Duration>) -> PooledObject {
        let now = Instant::now();
        PooledObject::new(
            1,
            Resource::with_capacity(ResourceKind::Buffer, 64),
            64,
            now,
            ttl,
        )
    }

    #[test]
    fn test_touch_updates_metadata() {
        let mut obj = object(None);
        assert_eq!(obj.use_count(), 0);

        let later = Instant::now() + Duration::from_secs(1);
        obj.touch(later);
        assert_eq!(obj.use_count(), 1);
        assert_eq!(obj.last_used(), later);
    }

    #[test]
    fn test_expiry_from_idle_time() {
        let mut obj = object(Some(Duration::from_secs(10)));
        let now = Instant::now();
        obj.touch(now);

        assert!(!obj.is_expired(now + Duration::from_secs(5)));
        assert!(obj.is_expired(now + Duration::from_secs(10)));
    }

    #[test]
    fn test_no_ttl_never_expires() {
        let obj = object(None);
        assert!(!obj.is_expired(Instant::now() + Duration::from_secs(3600)));
    }

    #[test]
    fn test_idle_flag_cleared_on_touch() {
        let mut obj = object(None);
        obj.mark_idle();
        assert!(obj.is_idle());

        obj.touch(Instant::now());
        assert!(!obj.is_idle());
    }
}
