use std::time::Duration;
use thiserror::Error;

use super::{AppError, ErrorCategory};

/// Errors raised by storage backends and the retrying storage facade
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage service used before initialize()")]
    NotInitialized,

    #[error("Connection to storage backend failed: {details}")]
    ConnectionFailed { details: String },

    #[error("Storage request timed out: {details}")]
    Timeout { details: String },

    #[error("Storage backend is throttling requests: {details}")]
    Throttled { details: String },

    #[error("Storage service unavailable: {details}")]
    ServiceUnavailable { details: String },

    #[error("Storage backend returned HTTP {status}: {details}")]
    Http { status: u16, details: String },

    #[error("Access denied to '{key}': {details}")]
    AccessDenied { key: String, details: String },

    #[error("Object not found: {key}")]
    NotFound { key: String },

    #[error("Bucket not found: {bucket}")]
    BucketNotFound { bucket: String },

    #[error("Object already exists: {key}")]
    AlreadyExists { key: String },

    #[error("Invalid storage key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("Invalid storage configuration: {details}")]
    Configuration { details: String },

    #[error("Storage I/O error: {details}")]
    Io { details: String },

    #[error("{operation} failed after {attempts} attempts in {elapsed:?}: {source}")]
    RetriesExhausted {
        operation: &'static str,
        attempts: u32,
        elapsed: Duration,
        #[source]
        source: Box<StorageError>,
    },

    #[error("{operation} exceeded its deadline after {attempts} attempts in {elapsed:?}")]
    DeadlineExceeded {
        operation: &'static str,
        attempts: u32,
        elapsed: Duration,
        last_error: Option<Box<StorageError>>,
    },
}

impl StorageError {
    /// Map an io error from the local filesystem backend
    pub fn from_io(error: std::io::Error, key: &str) -> Self {
        use std::io::ErrorKind;

        match error.kind() {
            ErrorKind::NotFound => StorageError::NotFound { key: key.to_string() },
            ErrorKind::PermissionDenied => StorageError::AccessDenied {
                key: key.to_string(),
                details: error.to_string(),
            },
            ErrorKind::AlreadyExists => StorageError::AlreadyExists { key: key.to_string() },
            ErrorKind::TimedOut | ErrorKind::WouldBlock => StorageError::Timeout {
                details: error.to_string(),
            },
            ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::BrokenPipe
            | ErrorKind::Interrupted => StorageError::ConnectionFailed {
                details: error.to_string(),
            },
            _ => StorageError::Io {
                details: error.to_string(),
            },
        }
    }

    /// Classify an HTTP status returned by an object store
    pub fn from_status(status: u16, key: &str, details: impl Into<String>) -> Self {
        let details = details.into();
        match status {
            403 => StorageError::AccessDenied { key: key.to_string(), details },
            404 => StorageError::NotFound { key: key.to_string() },
            408 => StorageError::Timeout { details },
            429 => StorageError::Throttled { details },
            503 => StorageError::ServiceUnavailable { details },
            _ => StorageError::Http { status, details },
        }
    }

    /// The error that ended a retry loop, or this error itself
    pub fn last_error(&self) -> &StorageError {
        match self {
            StorageError::RetriesExhausted { source, .. } => source.last_error(),
            StorageError::DeadlineExceeded { last_error: Some(source), .. } => source.last_error(),
            other => other,
        }
    }

    pub fn attempts(&self) -> Option<u32> {
        match self {
            StorageError::RetriesExhausted { attempts, .. }
            | StorageError::DeadlineExceeded { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self.last_error(),
            StorageError::NotFound { .. } | StorageError::BucketNotFound { .. }
        )
    }
}

impl AppError for StorageError {
    fn user_message(&self) -> String {
        match self {
            StorageError::NotInitialized => "File storage is not available".to_string(),
            StorageError::ConnectionFailed { .. }
            | StorageError::Timeout { .. }
            | StorageError::ServiceUnavailable { .. } => {
                "File storage is temporarily unavailable".to_string()
            }
            StorageError::Throttled { .. } => "File storage is busy, please try again shortly".to_string(),
            StorageError::Http { .. } | StorageError::Io { .. } => "A file storage operation failed".to_string(),
            StorageError::AccessDenied { .. } => "Access to the file was denied".to_string(),
            StorageError::NotFound { .. } | StorageError::BucketNotFound { .. } => "File not found".to_string(),
            StorageError::AlreadyExists { .. } => "A file with this name already exists".to_string(),
            StorageError::InvalidKey { .. } => "Invalid file name".to_string(),
            StorageError::Configuration { .. } => "File storage is misconfigured".to_string(),
            StorageError::RetriesExhausted { source, .. } => source.user_message(),
            StorageError::DeadlineExceeded { .. } => "The file operation took too long".to_string(),
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            StorageError::NotInitialized => "STORAGE_NOT_INITIALIZED",
            StorageError::ConnectionFailed { .. } => "STORAGE_CONNECTION_FAILED",
            StorageError::Timeout { .. } => "STORAGE_TIMEOUT",
            StorageError::Throttled { .. } => "STORAGE_THROTTLED",
            StorageError::ServiceUnavailable { .. } => "STORAGE_UNAVAILABLE",
            StorageError::Http { .. } => "STORAGE_HTTP_ERROR",
            StorageError::AccessDenied { .. } => "STORAGE_ACCESS_DENIED",
            StorageError::NotFound { .. } => "STORAGE_NOT_FOUND",
            StorageError::BucketNotFound { .. } => "STORAGE_BUCKET_NOT_FOUND",
            StorageError::AlreadyExists { .. } => "STORAGE_ALREADY_EXISTS",
            StorageError::InvalidKey { .. } => "STORAGE_INVALID_KEY",
            StorageError::Configuration { .. } => "STORAGE_CONFIG_INVALID",
            StorageError::Io { .. } => "STORAGE_IO_ERROR",
            StorageError::RetriesExhausted { .. } => "STORAGE_RETRIES_EXHAUSTED",
            StorageError::DeadlineExceeded { .. } => "STORAGE_DEADLINE_EXCEEDED",
        }
    }

    fn error_category(&self) -> ErrorCategory {
        match self {
            StorageError::NotInitialized | StorageError::Configuration { .. } => ErrorCategory::Config,
            _ => ErrorCategory::Storage,
        }
    }

    fn is_retryable(&self) -> bool {
        match self {
            StorageError::ConnectionFailed { .. }
            | StorageError::Timeout { .. }
            | StorageError::Throttled { .. }
            | StorageError::ServiceUnavailable { .. } => true,
            StorageError::Http { status, .. } => (500..600).contains(status),
            _ => false,
        }
    }

    fn suggested_action(&self) -> Option<String> {
        match self {
            StorageError::Throttled { .. } | StorageError::DeadlineExceeded { .. } => {
                Some("Retry the request in a few seconds".to_string())
            }
            StorageError::NotInitialized | StorageError::Configuration { .. } => {
                Some("Check the storage configuration".to_string())
            }
            _ => None,
        }
    }
}
