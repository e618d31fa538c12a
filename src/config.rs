use serde::Deserialize;

use crate::error::{Error, Result};

/// Upper bound for `max_pool_size`.
pub const MAX_POOL_SIZE_LIMIT: usize = 1000;

/// Upper bound for `default_capacity` (1 MiB).
pub const MAX_DEFAULT_CAPACITY: usize = 1024 * 1024;

/// A named capacity category used by the capacity estimator.
///
/// Categories must be strictly ascending by capacity; the estimator
/// maps payload shapes onto them from smallest to largest.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SizeCategory {
    /// Category name (e.g. "small", "xlarge")
    pub name: String,
    /// Byte estimate for payloads in this category
    pub capacity: usize,
}

impl SizeCategory {
    /// Convenience constructor.
    pub fn new(name: &str, capacity: usize) -> Self {
        Self {
            name: name.to_string(),
            capacity,
        }
    }
}

/// Engine configuration.
///
/// Validation is atomic: `validate()` either accepts the whole
/// configuration or rejects it without any state having been applied.
/// Unknown keys are rejected at deserialization time.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PoolConfig {
    /// Nominal per-pool object ceiling (1-1000)
    pub max_pool_size: usize,

    /// Buffer capacity used when no shape hint is available (bytes, <= 1 MiB)
    pub default_capacity: usize,

    /// Ordered capacity categories, strictly ascending
    pub size_categories: Vec<SizeCategory>,

    /// Ceiling for temporary elastic over-allocation (0 = disabled)
    pub emergency_limit: usize,

    /// Fraction of the memory limit that triggers forced cleanup (0-1)
    pub memory_limit_threshold: f64,

    /// Interval between automatic cleanup passes, in seconds
    pub cleanup_interval_secs: u64,

    /// Memory ceiling for auto-management, in bytes
    pub memory_limit_bytes: u64,

    /// Maximum entries in the overflow priority queue
    pub max_queue_size: usize,

    /// Idle time after which a pooled object expires, in seconds (0 = never)
    pub default_ttl_secs: u64,

    /// Pre-populate pools and the header cache at initialization
    pub warm_on_init: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_pool_size: 100,
            default_capacity: 8192,
            size_categories: vec![
                SizeCategory::new("small", 256),
                SizeCategory::new("medium", 1024),
                SizeCategory::new("large", 4096),
                SizeCategory::new("xlarge", 16384),
            ],
            emergency_limit: 0,
            memory_limit_threshold: 0.8,
            cleanup_interval_secs: 30,
            memory_limit_bytes: 256 * 1024 * 1024,
            max_queue_size: 64,
            default_ttl_secs: 300,
            warm_on_init: false,
        }
    }
}

impl PoolConfig {
    /// Validate all fields, failing fast on the first violation.
    pub fn validate(&self) -> Result<()> {
        if self.max_pool_size == 0 || self.max_pool_size > MAX_POOL_SIZE_LIMIT {
            return Err(Error::Config {
                field: "max_pool_size",
                reason: format!(
                    "{} is outside the accepted range 1-{}",
                    self.max_pool_size, MAX_POOL_SIZE_LIMIT
                ),
            });
        }

        if self.default_capacity == 0 || self.default_capacity > MAX_DEFAULT_CAPACITY {
            return Err(Error::Config {
                field: "default_capacity",
                reason: format!(
                    "{} is outside the accepted range 1-{}",
                    self.default_capacity, MAX_DEFAULT_CAPACITY
                ),
            });
        }

        if self.size_categories.is_empty() {
            return Err(Error::Config {
                field: "size_categories",
                reason: "at least one category is required".to_string(),
            });
        }

        for pair in self.size_categories.windows(2) {
            if pair[1].capacity <= pair[0].capacity {
                return Err(Error::Config {
                    field: "size_categories",
                    reason: format!(
                        "categories must be strictly ascending: `{}` ({}) does not exceed `{}` ({})",
                        pair[1].name, pair[1].capacity, pair[0].name, pair[0].capacity
                    ),
                });
            }
        }

        if !(self.memory_limit_threshold > 0.0 && self.memory_limit_threshold <= 1.0) {
            return Err(Error::Config {
                field: "memory_limit_threshold",
                reason: format!("{} is not a fraction in (0, 1]", self.memory_limit_threshold),
            });
        }

        if self.cleanup_interval_secs == 0 {
            return Err(Error::Config {
                field: "cleanup_interval_secs",
                reason: "must be at least 1 second".to_string(),
            });
        }

        if self.memory_limit_bytes == 0 {
            return Err(Error::Config {
                field: "memory_limit_bytes",
                reason: "must be non-zero".to_string(),
            });
        }

        if self.max_queue_size == 0 {
            return Err(Error::Config {
                field: "max_queue_size",
                reason: "must be non-zero".to_string(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(PoolConfig::default().validate().is_ok());
    }

    #[test]
    fn test_max_pool_size_range() {
        let config = PoolConfig {
            max_pool_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = PoolConfig {
            max_pool_size: 1001,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(Error::Config {
                field: "max_pool_size",
                ..
            })
        ));
    }

    #[test]
    fn test_default_capacity_cap() {
        let config = PoolConfig {
            default_capacity: 2 * 1024 * 1024,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(Error::Config {
                field: "default_capacity",
                ..
            })
        ));
    }

    #[test]
    fn test_size_categories_must_ascend() {
        let config = PoolConfig {
            size_categories: vec![
                SizeCategory::new("small", 256),
                SizeCategory::new("medium", 256),
            ],
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(Error::Config {
                field: "size_categories",
                ..
            })
        ));
    }

    #[test]
    fn test_threshold_must_be_fraction() {
        for bad in [0.0, -0.5, 1.5] {
            let config = PoolConfig {
                memory_limit_threshold: bad,
                ..Default::default()
            };
            assert!(config.validate().is_err(), "threshold {} accepted", bad);
        }
    }

    #[test]
    fn test_deserialize_partial() {
        let config: PoolConfig = serde_json::from_str(r#"{"max_pool_size": 2}"#).unwrap();
        assert_eq!(config.max_pool_size, 2);
        assert_eq!(config.default_capacity, 8192);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deserialize_rejects_unknown_key() {
        let result = serde_json::from_str::<PoolConfig>(r#"{"max_pool_sizes": 2}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_deserialize_size_categories() {
        let config: PoolConfig = serde_json::from_str(
            r#"{"size_categories": [
                {"name": "tiny", "capacity": 128},
                {"name": "huge", "capacity": 65536}
            ]}"#,
        )
        .unwrap();
        assert_eq!(config.size_categories.len(), 2);
        assert!(config.validate().is_ok());
    }
}
