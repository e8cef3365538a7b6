//! Cache Error Types
//!
//! Only typed access can fail from the caller's point of view; tier failures
//! are swallowed by the manager. Tier implementations still return these so
//! the manager can log what went wrong.

use derive_more::{Display, Error};

/// A cache error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for cache operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// A slower tier failed; the named tier is skipped for this operation.
    #[display("cache backend error: {_0}")]
    Backend(#[error(not(source))] String),
    /// A cached value could not be converted to or from the requested type.
    #[display("cache value serialization error")]
    Serialization,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Backend(_))
    }
}
