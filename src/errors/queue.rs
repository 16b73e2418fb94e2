use thiserror::Error;

use super::{AppError, ErrorCategory, StoreError};

/// Errors raised by the task queue
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Queue item {id} not found")]
    NotFound { id: i64 },

    #[error("Queue item {id} has used {attempts} of {max_attempts} attempts and cannot be retried")]
    RetryLimitReached { id: i64, attempts: i32, max_attempts: i32 },

    #[error("Invalid max_attempts {value}: must be at least 1")]
    InvalidMaxAttempts { value: i32 },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AppError for QueueError {
    fn user_message(&self) -> String {
        match self {
            QueueError::NotFound { .. } => "Queue item not found".to_string(),
            QueueError::RetryLimitReached { max_attempts, .. } => {
                format!("The task already failed {} times and will not be retried", max_attempts)
            }
            QueueError::InvalidMaxAttempts { .. } => "Invalid retry limit".to_string(),
            QueueError::Store(e) => e.user_message(),
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            QueueError::NotFound { .. } => "QUEUE_ITEM_NOT_FOUND",
            QueueError::RetryLimitReached { .. } => "QUEUE_RETRY_LIMIT_REACHED",
            QueueError::InvalidMaxAttempts { .. } => "QUEUE_INVALID_MAX_ATTEMPTS",
            QueueError::Store(e) => e.error_code(),
        }
    }

    fn error_category(&self) -> ErrorCategory {
        match self {
            QueueError::Store(_) => ErrorCategory::Database,
            _ => ErrorCategory::Queue,
        }
    }

    fn is_retryable(&self) -> bool {
        match self {
            QueueError::Store(e) => e.is_retryable(),
            _ => false,
        }
    }
}
