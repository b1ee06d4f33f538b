use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Table '{0}' already exists")]
    TableExists(String),

    #[error("Table '{0}' not found")]
    TableNotFound(String),

    #[error("Column '{0}' not found in table '{1}'")]
    ColumnNotFound(String, String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Lock error: {0}")]
    LockError(String),

    #[error("Failed to acquire connection: {0}")]
    Acquisition(String),

    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Fatal failure: {0}")]
    Fatal(String),

    #[error("Query '{query}' failed after {attempts} attempts ({waited:?} spent in backoff): {last}")]
    RetryExhausted {
        query: String,
        attempts: u32,
        waited: Duration,
        #[source]
        last: Box<DbError>,
    },

    #[error("Operation cancelled")]
    Cancelled,
}

/// Coarse classification used by the resilience stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// No connection could be obtained. Never retried.
    Acquisition,
    /// Expected to succeed if retried unchanged.
    Transient,
    /// Retrying cannot fix it.
    Fatal,
    /// The attempt budget was spent on transient failures.
    RetryExhausted,
    Cancelled,
}

impl DbError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Acquisition(_) => ErrorKind::Acquisition,
            Self::Transient(_) | Self::LockError(_) => ErrorKind::Transient,
            Self::RetryExhausted { .. } => ErrorKind::RetryExhausted,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::ParseError(_)
            | Self::TableExists(_)
            | Self::TableNotFound(_)
            | Self::ColumnNotFound(_, _)
            | Self::TypeMismatch(_)
            | Self::ConstraintViolation(_)
            | Self::ExecutionError(_)
            | Self::UnsupportedOperation(_)
            | Self::Fatal(_) => ErrorKind::Fatal,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    /// The last underlying failure when this error wraps an exhausted retry.
    pub fn last_failure(&self) -> Option<&DbError> {
        match self {
            Self::RetryExhausted { last, .. } => Some(last),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, DbError>;

impl<T> From<std::sync::PoisonError<T>> for DbError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}
