use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LogHubError {
    #[error("Failed to read config file '{path}': {cause}")]
    ConfigRead { path: PathBuf, cause: io::Error },

    #[error("Failed to parse config file '{path}': {cause}")]
    ConfigParse {
        path: PathBuf,
        cause: serde_json::Error,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to open or create database file '{path}': {cause}")]
    DatabaseConnection { path: String, cause: r2d2::Error },

    #[error("Database query failed for '{operation}': {cause}")]
    DatabaseQuery {
        operation: String,
        cause: rusqlite::Error,
    },

    #[error("Storage is busy, '{operation}' gave up after {waited:?}")]
    StorageBusy {
        operation: String,
        waited: Duration,
    },

    #[error("Unknown host '{ip}'")]
    HostNotFound { ip: String },

    #[error("{0}")]
    Validation(String),

    #[error("Failed to bind UDP socket to {address}: {cause}")]
    Bind { address: String, cause: io::Error },

    #[error("Failed to write CSV export: {0}")]
    Export(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Coarse error classes a caller can act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Safe to retry unchanged.
    Transient,
    /// The caller sent something wrong.
    Invalid,
    NotFound,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Transient => "unavailable",
            ErrorKind::Invalid => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Internal => "internal",
        }
    }
}

impl LogHubError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LogHubError::StorageBusy { .. } => ErrorKind::Transient,
            LogHubError::DatabaseQuery { cause, .. } if is_contention(cause) => {
                ErrorKind::Transient
            }
            LogHubError::Validation(_) | LogHubError::InvalidConfig(_) => ErrorKind::Invalid,
            LogHubError::HostNotFound { .. } => ErrorKind::NotFound,
            _ => ErrorKind::Internal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    /// Wraps a rusqlite error, keeping the name of the failed operation.
    pub fn query(operation: &str, cause: rusqlite::Error) -> Self {
        LogHubError::DatabaseQuery {
            operation: operation.to_string(),
            cause,
        }
    }
}

fn is_contention(cause: &rusqlite::Error) -> bool {
    matches!(
        cause.sqlite_error_code(),
        Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked)
    )
}

pub type Result<T> = std::result::Result<T, LogHubError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_are_distinguishable() {
        let busy = LogHubError::StorageBusy {
            operation: "insert log entry".to_string(),
            waited: Duration::from_millis(5000),
        };
        assert_eq!(busy.kind(), ErrorKind::Transient);
        assert!(busy.is_retryable());

        let missing = LogHubError::HostNotFound {
            ip: "10.0.0.9".to_string(),
        };
        assert_eq!(missing.kind(), ErrorKind::NotFound);
        assert!(!missing.is_retryable());

        let invalid = LogHubError::Validation("limit must be between 1 and 5000".to_string());
        assert_eq!(invalid.kind(), ErrorKind::Invalid);
    }

    #[test]
    fn test_sqlite_busy_is_transient() {
        let cause = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        );
        let error = LogHubError::query("insert log entry", cause);
        assert_eq!(error.kind(), ErrorKind::Transient);

        let cause = rusqlite::Error::QueryReturnedNoRows;
        let error = LogHubError::query("stats", cause);
        assert_eq!(error.kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_error_display() {
        let error = LogHubError::HostNotFound {
            ip: "192.168.1.20".to_string(),
        };
        assert!(error.to_string().contains("192.168.1.20"));
        assert_eq!(ErrorKind::Transient.as_str(), "unavailable");
    }
}
