use thiserror::Error;

use super::{AppError, ErrorCategory, StorageError, StoreError};

/// Errors raised by a task handler while working on a claimed queue item
#[derive(Error, Debug)]
pub enum TaskError {
    #[error("Document {document_id} referenced by the task no longer exists")]
    DocumentNotFound { document_id: i64 },

    #[error("Document {document_id} has no extractable text: {details}")]
    UnsupportedContent { document_id: i64, details: String },

    #[error("Task for document {document_id} failed: {details}")]
    Failed { document_id: i64, details: String },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AppError for TaskError {
    fn user_message(&self) -> String {
        match self {
            TaskError::DocumentNotFound { .. } => "The document was deleted before it could be processed".to_string(),
            TaskError::UnsupportedContent { .. } => "No text could be extracted from this document".to_string(),
            TaskError::Failed { .. } => "Document processing failed".to_string(),
            TaskError::Storage(e) => e.user_message(),
            TaskError::Store(e) => e.user_message(),
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            TaskError::DocumentNotFound { .. } => "TASK_DOCUMENT_NOT_FOUND",
            TaskError::UnsupportedContent { .. } => "TASK_UNSUPPORTED_CONTENT",
            TaskError::Failed { .. } => "TASK_FAILED",
            TaskError::Storage(e) => e.error_code(),
            TaskError::Store(e) => e.error_code(),
        }
    }

    fn error_category(&self) -> ErrorCategory {
        match self {
            TaskError::Storage(e) => e.error_category(),
            TaskError::Store(e) => e.error_category(),
            _ => ErrorCategory::Processing,
        }
    }

    /// Whether another attempt later might succeed. A storage failure that
    /// already exhausted the facade's retries still counts when its last
    /// error was transient.
    fn is_retryable(&self) -> bool {
        match self {
            TaskError::Failed { .. } => true,
            TaskError::Storage(e) => e.last_error().is_retryable(),
            TaskError::Store(e) => e.is_retryable(),
            TaskError::DocumentNotFound { .. } | TaskError::UnsupportedContent { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_exhausted_transient_storage_error_is_retryable_task() {
        let error = TaskError::from(StorageError::RetriesExhausted {
            operation: "download",
            attempts: 3,
            elapsed: Duration::from_millis(5),
            source: Box::new(StorageError::ServiceUnavailable { details: "503".to_string() }),
        });
        assert!(error.is_retryable());
    }

    #[test]
    fn test_content_errors_are_permanent() {
        let error = TaskError::UnsupportedContent {
            document_id: 7,
            details: "binary data".to_string(),
        };
        assert!(!error.is_retryable());
        assert_eq!(error.error_code(), "TASK_UNSUPPORTED_CONTENT");
    }
}
