//! Adaptive resource-pooling engine.
//!
//! Reuses expensive-to-construct, short-lived objects (message
//! buffers, structured HTTP-like objects, header tables) across
//! processing cycles. Pools resize themselves against observed memory
//! pressure, and an ordered overflow-strategy chain (elastic growth,
//! priority queueing, forced recycling, fresh construction) absorbs
//! exhaustion so a checkout never fails for a recognized kind.

pub mod capacity;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod eviction;
pub mod memory;
pub mod metrics;
pub mod overflow;
pub mod pool;
pub mod types;

pub use capacity::{CapacityEstimator, ShapeHint};
pub use config::PoolConfig;
pub use coordinator::{Checkout, PoolCoordinator};
pub use error::{Error, Result};
pub use memory::{MemoryPressureMonitor, MemoryTier};
pub use overflow::{AcquireRequest, QueuePoll, QueueTicket};
pub use pool::{Lease, LeaseOrigin};
pub use types::{Priority, Resource, ResourceKind};
