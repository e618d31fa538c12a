//! Capacity estimation from payload shape.
//!
//! Maps shape hints (target length, header count, body size) onto the
//! configured size categories and rounds the estimate up to a
//! power-of-two pool bucket.

use crate::config::PoolConfig;

/// Byte estimate for a payload with no elements at all.
const EMPTY_ESTIMATE: usize = 64;

/// Smallest bucket a pool will ever use.
pub const MIN_BUCKET: usize = 64;

/// Shape of a payload as reported by the message layer.
///
/// Only used for capacity estimation; the engine never parses anything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShapeHint {
    /// Length of the request target / URI string
    pub target_len: usize,
    /// Number of header entries
    pub header_count: usize,
    /// Expected body size in bytes
    pub body_size: usize,
}

impl ShapeHint {
    /// No shape information; the estimator falls back to the
    /// configured default capacity.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Shape of a structured message.
    pub fn message(header_count: usize, body_size: usize) -> Self {
        Self {
            target_len: 0,
            header_count,
            body_size,
        }
    }

    /// Shape of a raw buffer payload.
    pub fn buffer(body_size: usize) -> Self {
        Self {
            target_len: 0,
            header_count: 0,
            body_size,
        }
    }

    /// Shape of a parsed-target object.
    pub fn uri(target_len: usize) -> Self {
        Self {
            target_len,
            header_count: 0,
            body_size: 0,
        }
    }

    /// Collection size used for category classification.
    #[inline]
    pub fn element_count(&self) -> usize {
        self.header_count
    }

    /// True when no dimension carries information.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.target_len == 0 && self.header_count == 0 && self.body_size == 0
    }
}

/// Size class a payload shape falls into, by element count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SizeClass {
    Small,
    Medium,
    Large,
    XLarge,
}

impl SizeClass {
    /// Classify by collection size: empty and <10 elements are small,
    /// then <100, <1000, and everything above.
    pub fn classify(element_count: usize) -> Self {
        match element_count {
            0..=9 => SizeClass::Small,
            10..=99 => SizeClass::Medium,
            100..=999 => SizeClass::Large,
            _ => SizeClass::XLarge,
        }
    }

    /// Index into the ordered category list.
    #[inline]
    fn index(self) -> usize {
        match self {
            SizeClass::Small => 0,
            SizeClass::Medium => 1,
            SizeClass::Large => 2,
            SizeClass::XLarge => 3,
        }
    }
}

/// Estimates object capacities from shape hints.
///
/// Built from validated configuration; the category table is the
/// config's `size_categories` and never changes after construction.
#[derive(Debug, Clone)]
pub struct CapacityEstimator {
    categories: Vec<usize>,
    default_capacity: usize,
}

impl CapacityEstimator {
    /// Build from validated configuration.
    pub fn from_config(config: &PoolConfig) -> Self {
        Self {
            categories: config.size_categories.iter().map(|c| c.capacity).collect(),
            default_capacity: config.default_capacity,
        }
    }

    /// Byte estimate for the category a shape falls into. Hosts with
    /// fewer than four categories get the last one for the upper
    /// classes.
    fn category_bytes(&self, class: SizeClass) -> usize {
        let idx = class.index().min(self.categories.len() - 1);
        self.categories[idx]
    }

    /// Estimate retained bytes for a payload of this shape.
    pub fn estimate(&self, shape: &ShapeHint) -> usize {
        if shape.is_empty() {
            return self.default_capacity;
        }

        let base = if shape.element_count() == 0 {
            EMPTY_ESTIMATE
        } else {
            self.category_bytes(SizeClass::classify(shape.element_count()))
        };

        base + shape.body_size + shape.target_len
    }

    /// Smallest power-of-two bucket that fits the estimate.
    pub fn optimal_capacity(&self, shape: &ShapeHint) -> usize {
        bucket_for(self.estimate(shape))
    }
}

/// Round a byte estimate up to its pool bucket.
#[inline]
pub fn bucket_for(bytes: usize) -> usize {
    bytes.next_power_of_two().max(MIN_BUCKET)
}
