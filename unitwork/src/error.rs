//! Crate-level error type
//!
//! Data operations return [`RepositoryError`] directly. [`Error`] wraps it
//! together with the failures of the ambient layers (configuration, pool
//! setup, logging) for callers that want one error type.

use thiserror::Error;

use crate::repository::RepositoryError;

/// Result alias using the crate [`Error`]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(Box<figment::Error>),

    /// Repository error with operation context
    #[error("{0}")]
    Repository(#[from] RepositoryError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Error::Config(Box::new(err))
    }
}

impl Error {
    /// The wrapped repository error, if any
    pub fn as_repository(&self) -> Option<&RepositoryError> {
        match self {
            Error::Repository(e) => Some(e),
            _ => None,
        }
    }
}
