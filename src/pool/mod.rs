//! Object pooling for reducing allocation overhead.
//!
//! One pool per resource kind, each subdivided into power-of-two
//! capacity buckets. Pools reuse objects across processing cycles and
//! shrink through the ceilings of the current memory tier.

mod kind_pool;
mod object;
mod registry;

pub use kind_pool::{BucketSnapshot, KindPool, PoolAcquire, PoolStatsSnapshot};
pub use object::{Lease, LeaseOrigin, PooledObject};
pub use registry::PoolRegistry;
