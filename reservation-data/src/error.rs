//! Crate-level errors
//!
//! Repository and query operations return [`RepositoryError`] directly.
//! [`Error`] covers everything around them: loading configuration,
//! establishing pools and installing the tracing subscriber. It wraps
//! repository errors so application code can use one `?` type.

use thiserror::Error;

use crate::backend::BackendError;
use crate::repository::RepositoryError;

/// Result type alias using the crate error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for setup and application glue
///
/// Large error variants are boxed to reduce stack size
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(Box<figment::Error>),

    /// Structured repository error
    #[error("{0}")]
    Repository(Box<RepositoryError>),

    /// Connection or pool setup failed
    #[error("Connection error: {0}")]
    Backend(#[from] BackendError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// The wrapped repository error, if any
    pub fn as_repository(&self) -> Option<&RepositoryError> {
        match self {
            Self::Repository(err) => Some(err),
            _ => None,
        }
    }

    /// Whether retrying the failed call may succeed
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Repository(err) => err.is_retriable(),
            Self::Backend(BackendError::Unavailable(_) | BackendError::Timeout(_)) => true,
            _ => false,
        }
    }
}

// Manual From implementations for boxed errors
impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Error::Config(Box::new(err))
    }
}

impl From<RepositoryError> for Error {
    fn from(err: RepositoryError) -> Self {
        Error::Repository(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{RepositoryErrorKind, RepositoryOperation};

    #[test]
    fn test_repository_error_passes_through() {
        let err: Error = RepositoryError::timeout(RepositoryOperation::Query, "slow").into();
        assert!(err.is_retriable());
        assert_eq!(
            err.as_repository().map(|e| e.kind),
            Some(RepositoryErrorKind::Timeout)
        );
        assert_eq!(
            err.to_string(),
            RepositoryError::timeout(RepositoryOperation::Query, "slow").to_string()
        );
    }

    #[test]
    fn test_backend_error_display() {
        let err: Error = BackendError::Unavailable("refused".to_string()).into();
        assert_eq!(err.to_string(), "Connection error: store unavailable: refused");
        assert!(err.is_retriable());
        assert!(!Error::Internal("x".into()).is_retriable());
    }
}
