//! Memory pressure monitoring and dynamic pool sizing.
//!
//! Samples resident memory through a pluggable probe, maps it to a
//! discrete pressure tier, and publishes the per-kind pool size table
//! the current tier allows.

mod monitor;
mod probe;

pub use monitor::{MemoryPressureMonitor, MemorySnapshot, MemoryTier, PoolSizeTable};
pub use probe::{MemoryProbe, ProcessProbe, StaticProbe};
