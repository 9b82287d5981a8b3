use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Concurrent batch: {0}")]
    ConcurrentBatch(String),

    #[error("Write to read-only batch: {0}")]
    ReadOnlyBatch(String),

    #[error("Batch already {state}: {op}")]
    TerminalBatch { state: String, op: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid name \"{0}\": names must be non-empty and must not contain '/'")]
    InvalidName(String),

    #[error("Invalid change state: {0}")]
    InvalidChangeState(i32),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Server unavailable: {0}")]
    Unavailable(String),

    #[error("Request timeout: {0}")]
    Timeout(String),

    #[error("Request cancelled: {0}")]
    Cancelled(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Unimplemented: {0}")]
    Unimplemented(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

/// Broad classification of an [`Error`], independent of transport codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Commit lost a race with a concurrent writer. Retry the whole batch.
    ConcurrentBatch,
    /// A write was issued through a read-only batch.
    ReadOnlyBatch,
    /// The batch was already committed or aborted.
    TerminalBatch,
    /// A record from the server could not be decoded.
    Decode,
    /// The caller passed a malformed name.
    Usage,
    /// Transport, permission or server-side failure.
    Rpc,
}

impl Error {
    /// Returns a stable error code for this error variant.
    pub fn code(&self) -> &'static str {
        match self {
            Error::ConcurrentBatch(_) => "CONCURRENT_BATCH",
            Error::ReadOnlyBatch(_) => "READ_ONLY_BATCH",
            Error::TerminalBatch { .. } => "TERMINAL_BATCH",
            Error::NotFound(_) => "NOT_FOUND",
            Error::AlreadyExists(_) => "ALREADY_EXISTS",
            Error::InvalidArgument(_) => "INVALID_ARGUMENT",
            Error::InvalidName(_) => "INVALID_NAME",
            Error::InvalidChangeState(_) => "INVALID_CHANGE_STATE",
            Error::PermissionDenied(_) => "PERMISSION_DENIED",
            Error::ConnectionError(_) => "CONNECTION_ERROR",
            Error::Unavailable(_) => "UNAVAILABLE",
            Error::Timeout(_) => "TIMEOUT",
            Error::Cancelled(_) => "CANCELLED",
            Error::Internal(_) => "INTERNAL_ERROR",
            Error::Unimplemented(_) => "UNIMPLEMENTED",
            Error::Unknown(_) => "UNKNOWN",
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ConcurrentBatch(_) => ErrorKind::ConcurrentBatch,
            Error::ReadOnlyBatch(_) => ErrorKind::ReadOnlyBatch,
            Error::TerminalBatch { .. } => ErrorKind::TerminalBatch,
            Error::InvalidChangeState(_) => ErrorKind::Decode,
            Error::InvalidName(_) => ErrorKind::Usage,
            Error::NotFound(_)
            | Error::AlreadyExists(_)
            | Error::InvalidArgument(_)
            | Error::PermissionDenied(_)
            | Error::ConnectionError(_)
            | Error::Unavailable(_)
            | Error::Timeout(_)
            | Error::Cancelled(_)
            | Error::Internal(_)
            | Error::Unimplemented(_)
            | Error::Unknown(_) => ErrorKind::Rpc,
        }
    }

    /// True for the commit-conflict class, the only error that re-running a
    /// batch can fix.
    pub fn is_concurrent_batch(&self) -> bool {
        self.kind() == ErrorKind::ConcurrentBatch
    }

    pub fn terminal(state: &str, op: &str) -> Error {
        Error::TerminalBatch {
            state: state.to_string(),
            op: op.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(
            Error::ConcurrentBatch("k".into()).kind(),
            ErrorKind::ConcurrentBatch
        );
        assert_eq!(Error::ReadOnlyBatch("put".into()).kind(), ErrorKind::ReadOnlyBatch);
        assert_eq!(Error::terminal("committed", "get").kind(), ErrorKind::TerminalBatch);
        assert_eq!(Error::InvalidChangeState(7).kind(), ErrorKind::Decode);
        assert_eq!(Error::Unavailable("down".into()).kind(), ErrorKind::Rpc);
        assert_eq!(Error::PermissionDenied("no".into()).kind(), ErrorKind::Rpc);
    }

    #[test]
    fn test_only_conflicts_are_concurrent_batch() {
        assert!(Error::ConcurrentBatch("x".into()).is_concurrent_batch());
        assert!(!Error::Unavailable("x".into()).is_concurrent_batch());
        assert!(!Error::terminal("aborted", "commit").is_concurrent_batch());
    }

    #[test]
    fn test_terminal_display() {
        let err = Error::terminal("aborted", "put");
        assert_eq!(err.to_string(), "Batch already aborted: put");
        assert_eq!(err.code(), "TERMINAL_BATCH");
    }
}
