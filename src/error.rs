use std::fmt;

/// Unified error type for pool engine operations
#[derive(Debug)]
pub enum Error {
    /// Configuration rejected at validation time; nothing was applied
    Config {
        /// Offending configuration field
        field: &'static str,
        /// Why the value was rejected
        reason: String,
    },

    /// Unrecognized resource kind name (programmer error)
    UnknownResource(String),

    /// A queued overflow request expired before capacity became available
    QueueTimeout,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config { field, reason } => {
                write!(f, "Invalid configuration for `{}`: {}", field, reason)
            }
            Error::UnknownResource(name) => write!(f, "Unknown resource kind: {}", name),
            Error::QueueTimeout => write!(f, "Queued request timed out"),
        }
    }
}

impl std::error::Error for Error {}

/// Result type alias for pool engine operations
pub type Result<T> = std::result::Result<T, Error>;
