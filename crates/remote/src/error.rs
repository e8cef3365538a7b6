//! Remote Error Types
//!
//! The listing collaborator must let callers tell a throttled request from a
//! flaky one from a node that will never answer. Retrying is the client's own
//! business; by the time an error reaches discovery it is final for that node.

use derive_more::{Display, Error};

/// A remote error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for remote operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The service asked us to slow down. Back off, then retry.
    #[display("rate limited by remote service")]
    RateLimited,
    /// Timeouts, resets, 5xx responses. Retryable.
    #[display("transient remote failure")]
    Transient,
    /// The node is permanently unreachable (access revoked, broken item).
    #[display("node unreachable: {_0}")]
    Fatal(#[error(not(source))] String),
    #[display("node not found: {_0}")]
    NotFound(#[error(not(source))] String),
    /// The service answered with something we can't interpret.
    #[display("invalid response: {_0}")]
    InvalidResponse(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited | Self::Transient)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ErrorKind::RateLimited, true)]
    #[case(ErrorKind::Transient, true)]
    #[case(ErrorKind::Fatal("01ABC".to_string()), false)]
    #[case(ErrorKind::NotFound("01ABC".to_string()), false)]
    #[case(ErrorKind::InvalidResponse("bad page token".to_string()), false)]
    fn test_retryable(#[case] kind: ErrorKind, #[case] expected: bool) {
        assert_eq!(kind.is_retryable(), expected);
    }

    #[test]
    fn test_display() {
        assert_eq!(ErrorKind::Fatal("01ABC".to_string()).to_string(), "node unreachable: 01ABC");
    }
}
