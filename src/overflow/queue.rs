use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::capacity::ShapeHint;
use crate::overflow::{AcquireRequest, OverflowOutcome, OverflowStrategy, StrategyMetrics};
use crate::pool::Lease;
use crate::types::{Clock, Priority, ResourceKind};

/// Timeout applied when the request does not carry one.
const DEFAULT_QUEUE_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle for a parked request. Single-use: once it reports `Ready`
/// or `TimedOut` the ticket is spent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueTicket(u64);

/// Poll result for a parked request.
#[derive(Debug)]
pub enum QueuePoll {
    /// Still waiting for pool capacity
    Pending,
    /// Capacity arrived; here is the object
    Ready(Lease),
    /// The request expired before capacity arrived (also reported for
    /// spent tickets)
    TimedOut,
}

#[derive(Debug)]
struct QueuedRequest {
    seq: u64,
    kind: ResourceKind,
    shape: ShapeHint,
    priority: Priority,
    queued_at: Instant,
    deadline: Instant,
}

impl PartialEq for QueuedRequest {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl Eq for QueuedRequest {}

impl Ord for QueuedRequest {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Max-heap: higher priority first, then earliest arrival,
        // then lowest sequence number.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.queued_at.cmp(&self.queued_at))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueuedRequest {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
struct QueueInner {
    heap: BinaryHeap<QueuedRequest>,
    /// Live tickets and their deadlines; heap entries not present
    /// here are stale and skipped on pop.
    pending: FxHashMap<u64, Instant>,
    /// Fulfilled requests awaiting their poll.
    ready: FxHashMap<u64, Lease>,
    /// Expired tickets kept as tombstones until polled or cleared.
    timed_out: FxHashSet<u64>,
    next_seq: u64,
}

/// Priority-ordered wait queue for overflow requests.
///
/// Nothing blocks: enqueueing hands back a ticket, the coordinator
/// drains the queue when pool capacity frees up, and holders poll
/// their tickets. Expired entries are dropped and counted, never
/// silently retried.
pub struct PriorityQueue {
    inner: Mutex<QueueInner>,
    max_size: usize,
    enqueued: AtomicU64,
    served: AtomicU64,
    timeouts: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl PriorityQueue {
    pub fn new(max_size: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
            max_size,
            enqueued: AtomicU64::new(0),
            served: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            clock,
        }
    }

    /// Live queued requests.
    pub fn depth(&self) -> usize {
        self.inner.lock().pending.len()
    }

    pub fn is_full(&self) -> bool {
        self.depth() >= self.max_size
    }

    /// Park a request. The caller keeps the ticket and polls it.
    pub fn enqueue(
        &self,
        kind: ResourceKind,
        shape: ShapeHint,
        priority: Priority,
        timeout: Option<Duration>,
    ) -> QueueTicket {
        let now = self.clock.now();
        let mut inner = self.inner.lock();

        let seq = inner.next_seq;
        inner.next_seq += 1;

        let deadline = now + timeout.unwrap_or(DEFAULT_QUEUE_TIMEOUT);
        inner.pending.insert(seq, deadline);
        inner.heap.push(QueuedRequest {
            seq,
            kind,
            shape,
            priority,
            queued_at: now,
            deadline,
        });

        self.enqueued.fetch_add(1, Ordering::Relaxed);
        QueueTicket(seq)
    }

    /// Drain the queue in priority order against current availability.
    ///
    /// The provider attempts one pool checkout per request; the drain
    /// stops at the first request it cannot satisfy. Expired requests
    /// encountered on the way are dropped and counted. Returns the
    /// number of requests served.
    pub fn process_queue<F>(&self, mut provider: F) -> usize
    where
        F: FnMut(ResourceKind, &ShapeHint) -> Option<Lease>,
    {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        let mut served = 0;

        while let Some(req) = inner.heap.pop() {
            if !inner.pending.contains_key(&req.seq) {
                continue; // stale heap entry
            }

            if now >= req.deadline {
                inner.pending.remove(&req.seq);
                inner.timed_out.insert(req.seq);
                self.timeouts.fetch_add(1, Ordering::Relaxed);
                continue;
            }

            match provider(req.kind, &req.shape) {
                Some(lease) => {
                    inner.pending.remove(&req.seq);
                    inner.ready.insert(req.seq, lease);
                    self.served.fetch_add(1, Ordering::Relaxed);
                    served += 1;
                }
                None => {
                    inner.heap.push(req);
                    break;
                }
            }
        }

        served
    }

    /// Poll a ticket. `Ready` hands the lease over exactly once.
    pub fn poll(&self, ticket: QueueTicket) -> QueuePoll {
        let now = self.clock.now();
        let mut inner = self.inner.lock();

        if let Some(lease) = inner.ready.remove(&ticket.0) {
            return QueuePoll::Ready(lease);
        }

        if let Some(&deadline) = inner.pending.get(&ticket.0) {
            if now >= deadline {
                inner.pending.remove(&ticket.0);
                inner.timed_out.insert(ticket.0);
                self.timeouts.fetch_add(1, Ordering::Relaxed);
                return QueuePoll::TimedOut;
            }
            return QueuePoll::Pending;
        }

        if inner.timed_out.remove(&ticket.0) {
            return QueuePoll::TimedOut;
        }

        // Spent or unknown ticket.
        QueuePoll::TimedOut
    }

    /// Drop pending requests past their deadline. Returns how many.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let mut inner = self.inner.lock();

        let expired: Vec<u64> = inner
            .pending
            .iter()
            .filter(|(_, &deadline)| now >= deadline)
            .map(|(&seq, _)| seq)
            .collect();

        for seq in &expired {
            inner.pending.remove(seq);
            inner.timed_out.insert(*seq);
        }
        self.timeouts
            .fetch_add(expired.len() as u64, Ordering::Relaxed);
        expired.len()
    }

    /// Drop everything. Ready leases return to their pools.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.heap.clear();
        inner.pending.clear();
        inner.ready.clear();
        inner.timed_out.clear();
    }

    pub fn reset_counters(&self) {
        self.enqueued.store(0, Ordering::Relaxed);
        self.served.store(0, Ordering::Relaxed);
        self.timeouts.store(0, Ordering::Relaxed);
    }

    pub fn enqueued(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    pub fn served(&self) -> u64 {
        self.served.load(Ordering::Relaxed)
    }

    pub fn timeouts(&self) -> u64 {
        self.timeouts.load(Ordering::Relaxed)
    }
}

/// Queueing strategy: eligible only for requests that carry a
/// priority, while the queue has room.
pub struct PriorityQueuing {
    queue: Arc<PriorityQueue>,
}

impl PriorityQueuing {
    pub fn new(queue: Arc<PriorityQueue>) -> Self {
        Self { queue }
    }
}

impl OverflowStrategy for PriorityQueuing {
    fn name(&self) -> &'static str {
        "queue"
    }

    fn can_handle(&self, _kind: ResourceKind, req: &AcquireRequest) -> bool {
        req.priority.is_some() && !self.queue.is_full()
    }

    fn handle(&self, kind: ResourceKind, req: &AcquireRequest) -> Option<OverflowOutcome> {
        let priority = req.priority?;
        let ticket = self
            .queue
            .enqueue(kind, req.shape, priority, req.timeout);
        Some(OverflowOutcome::Queued(ticket))
    }

    fn metrics(&self) -> StrategyMetrics {
        StrategyMetrics {
            name: self.name(),
            attempts: self.queue.enqueued(),
            fulfilled: self.queue.served(),
            detail: vec![
                ("depth", self.queue.depth() as f64),
                ("timeouts", self.queue.timeouts() as f64),
            ],
        }
    }
}
