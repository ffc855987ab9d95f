//! Error types for the core library.

/// Result type alias for the core library.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the core library.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Value does not fit in the 63-bit key space.
    #[error("invalid token: {0} is outside the 63-bit key space")]
    InvalidToken(u64),

    /// Byte that does not encode a [`NodeState`](crate::NodeState).
    #[error("invalid node state: {0}")]
    InvalidState(u8),
}
