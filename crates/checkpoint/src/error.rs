use derive_more::{Display, Error};

/// A checkpoint error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for checkpoint operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The sink rejected a read or write. Buffered entries stay pending.
    #[display("checkpoint persistence error")]
    Persistence,
    /// A payload could not be converted to or from the requested type.
    #[display("checkpoint payload serialization error")]
    Serialization,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Persistence)
    }
}
