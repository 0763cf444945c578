//! Error types for wingman-core.
//!
//! Mirrors the control-plane's error taxonomy so that callers can match on
//! kind instead of parsing messages, and so the HTTP layer can derive a
//! status code without re-deriving the mapping itself.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for wingman-core.
#[derive(Debug, Error)]
pub enum Error {
    // Store errors
    #[error("store unavailable: {message}")]
    StoreUnavailable {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    #[error("schema mismatch for table {table}")]
    SchemaMismatch { table: String },

    #[error("integrity failure: {message}")]
    IntegrityFailure { message: String },

    // Network / download errors
    #[error("network failure: {message}")]
    NetworkFailure {
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    #[error("remote resource missing: {url}")]
    RemoteMissing { url: String },

    #[error("download cancelled by user")]
    CancelledByUser,

    // Inference errors
    #[error("out of GPU memory, retries exhausted")]
    OutOfMemory,

    #[error("model loading failed: {message}")]
    ModelLoadingException { message: String },

    #[error("inference child exited with code {code}: {message}")]
    ChildFailed { code: i32, message: String },

    // Control API errors
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("not found: {resource}")]
    NotFound { resource: String },

    #[error("conflict: {message}")]
    Conflict { message: String },

    #[error("busy: {message}")]
    Busy { message: String },

    // File system / serialization
    #[error("io error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("json error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("configuration error: {message}")]
    Config { message: String },

    #[error("{0}")]
    Other(String),
}

/// Result type alias for wingman-core operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::StoreUnavailable {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::NetworkFailure {
                message: format!("request timed out: {err}"),
                source: Some(err),
            }
        } else {
            Error::NetworkFailure {
                message: err.to_string(),
                source: Some(err),
            }
        }
    }
}

impl Error {
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        Error::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// HTTP status code this error should surface as, per the error taxonomy table.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::StoreUnavailable { .. }
            | Error::SchemaMismatch { .. }
            | Error::IntegrityFailure { .. }
            | Error::OutOfMemory
            | Error::ModelLoadingException { .. }
            | Error::ChildFailed { .. }
            | Error::Io { .. }
            | Error::Json { .. }
            | Error::Config { .. }
            | Error::Other(_) => 500,

            Error::NetworkFailure { .. } | Error::RemoteMissing { .. } => 404,
            Error::CancelledByUser => 200,
            Error::InvalidArgument { .. } => 422,
            Error::NotFound { .. } => 404,
            Error::Conflict { .. } => 208,
            Error::Busy { .. } => 503,
        }
    }

    /// Whether this error represents a transient condition worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::NetworkFailure { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            Error::NotFound {
                resource: "x".into()
            }
            .status_code(),
            404
        );
        assert_eq!(
            Error::Busy {
                message: "start mutex held".into()
            }
            .status_code(),
            503
        );
        assert_eq!(
            Error::Conflict {
                message: "already active".into()
            }
            .status_code(),
            208
        );
        assert_eq!(
            Error::InvalidArgument {
                message: "missing modelRepo".into()
            }
            .status_code(),
            422
        );
    }

    #[test]
    fn test_retryable() {
        assert!(Error::NetworkFailure {
            message: "timeout".into(),
            source: None,
        }
        .is_retryable());
        assert!(!Error::OutOfMemory.is_retryable());
    }
}
