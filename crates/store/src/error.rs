//! Store Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// A store error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("database error")]
    Database,
    #[display("database migration error")]
    Migration,
    /// A row or payload could not be converted to/from its model.
    #[display("invalid data: {_0}")]
    InvalidData(#[error(not(source))] &'static str),
    /// The sink cannot be reached at all (connection lost, disk gone).
    #[display("persistence unavailable")]
    Unavailable,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Database | Self::Unavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_display() {
        assert_eq!(ErrorKind::InvalidData("timestamp").to_string(), "invalid data: timestamp");
        assert_eq!(ErrorKind::Unavailable.to_string(), "persistence unavailable");
    }

    #[test]
    fn error_kind_retryable() {
        assert!(ErrorKind::Database.is_retryable());
        assert!(!ErrorKind::InvalidData("payload").is_retryable());
        assert!(!ErrorKind::Migration.is_retryable());
    }
}
