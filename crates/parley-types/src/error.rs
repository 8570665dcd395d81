use thiserror::Error;

/// Error taxonomy shared by the store, the pagination engine and the
/// history service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    /// Malformed cursor, missing required field or bad filter combination.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Channel, message or since-reference absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// Caller is not a member of the channel.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Pool exhaustion, timeout, I/O or a lost constraint race. Retryable.
    #[error("transient storage failure: {0}")]
    TransientStorageFailure(String),
}

impl ChatError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn denied(msg: impl Into<String>) -> Self {
        Self::PermissionDenied(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::TransientStorageFailure(msg.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientStorageFailure(_))
    }
}
