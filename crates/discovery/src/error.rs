//! Discovery Error Types
//!
//! Per-node and per-record failures never surface here; they are counted in
//! the traversal report. These are the failures that end a run.

use derive_more::{Display, Error};

/// A discovery error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for discovery operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Sites could not be enumerated.
    #[display("remote listing failed")]
    Remote,
    /// Too many consecutive batches failed to persist; the run was aborted.
    #[display("persistence unavailable")]
    PersistenceUnavailable,
    #[display("checkpoint error")]
    Checkpoint,
    /// The database could not be opened.
    #[display("store error")]
    Store,
    #[display("invalid configuration")]
    Config,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Remote | Self::PersistenceUnavailable | Self::Checkpoint)
    }
}
