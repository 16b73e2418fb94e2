use thiserror::Error;

use super::{AppError, ErrorCategory, QueueError, StorageError, StoreError};

/// Errors raised while ingesting an upload
#[derive(Error, Debug)]
pub enum IngestionError {
    #[error("Empty upload: {filename}")]
    EmptyFile { filename: String },

    #[error("Upload of {size} bytes exceeds the limit of {max_size} bytes")]
    FileTooLarge { size: u64, max_size: u64 },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl AppError for IngestionError {
    fn user_message(&self) -> String {
        match self {
            IngestionError::EmptyFile { .. } => "The uploaded file is empty".to_string(),
            IngestionError::FileTooLarge { max_size, .. } => {
                format!("The uploaded file exceeds the {} MB limit", max_size / (1024 * 1024))
            }
            IngestionError::Storage(e) => e.user_message(),
            IngestionError::Store(e) => e.user_message(),
            IngestionError::Queue(e) => e.user_message(),
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            IngestionError::EmptyFile { .. } => "INGESTION_EMPTY_FILE",
            IngestionError::FileTooLarge { .. } => "INGESTION_FILE_TOO_LARGE",
            IngestionError::Storage(e) => e.error_code(),
            IngestionError::Store(e) => e.error_code(),
            IngestionError::Queue(e) => e.error_code(),
        }
    }

    fn error_category(&self) -> ErrorCategory {
        match self {
            IngestionError::Storage(e) => e.error_category(),
            IngestionError::Store(e) => e.error_category(),
            IngestionError::Queue(e) => e.error_category(),
            _ => ErrorCategory::Processing,
        }
    }

    fn is_retryable(&self) -> bool {
        match self {
            IngestionError::Storage(e) => e.is_retryable(),
            IngestionError::Store(e) => e.is_retryable(),
            IngestionError::Queue(e) => e.is_retryable(),
            _ => false,
        }
    }
}
