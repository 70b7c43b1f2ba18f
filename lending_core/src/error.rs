//! Error types for the lending_core library.

use std::io;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for lending_core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed or missing required input
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Referenced book or loan does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation would violate a domain invariant
    #[error("Conflict: {0}")]
    Conflict(String),

    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Snapshot file exists but cannot be trusted
    #[error("Corrupt snapshot: {0}")]
    Corrupt(String),

    /// Durable store could not be used (locks, read-only access)
    #[error("Storage error: {0}")]
    Storage(String),
}

/// Caller-facing classification of an [`Error`].
///
/// The first three kinds describe a bad request and are never transient.
/// `StorageFailure` is an infrastructure fault.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    Conflict,
    StorageFailure,
    Configuration,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::Config(_) | Error::Toml(_) => ErrorKind::Configuration,
            Error::Io(_)
            | Error::Json(_)
            | Error::Csv(_)
            | Error::Corrupt(_)
            | Error::Storage(_) => ErrorKind::StorageFailure,
        }
    }

    /// True for errors the caller caused and can fix by changing the request
    pub fn is_caller_facing(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::InvalidArgument | ErrorKind::NotFound | ErrorKind::Conflict
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_errors_are_caller_facing() {
        assert!(Error::Conflict("no copies".into()).is_caller_facing());
        assert!(Error::NotFound("book 3".into()).is_caller_facing());
        assert!(Error::InvalidArgument("title".into()).is_caller_facing());
    }

    #[test]
    fn test_io_errors_are_storage_failures() {
        let err = Error::from(io::Error::new(io::ErrorKind::Other, "disk full"));
        assert_eq!(err.kind(), ErrorKind::StorageFailure);
        assert!(!err.is_caller_facing());
        assert_eq!(Error::Corrupt("x".into()).kind(), ErrorKind::StorageFailure);
    }
}
