use std::fmt;

use serde::Serialize;

/// Request priority for overflow queueing.
///
/// The numeric weight decides queue order; ties are broken by arrival
/// time. `Ord` follows the weights, so `System` sorts above `Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
    System,
}

impl Priority {
    /// Numeric weight used in statistics output.
    #[inline]
    pub fn weight(self) -> u8 {
        match self {
            Priority::Low => 25,
            Priority::Normal => 50,
            Priority::High => 75,
            Priority::System => 100,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::System => "system",
        };
        f.write_str(name)
    }
}
