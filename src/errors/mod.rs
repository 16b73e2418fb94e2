use serde::{Deserialize, Serialize};

/// Broad area an error originated from, used as a structured logging field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Entity store (memory or database backend)
    Database,
    /// File storage backend
    Storage,
    /// Task queue state machine
    Queue,
    /// Text extraction and other task work
    Processing,
    /// Configuration and setup issues
    Config,
}

/// Common trait for all custom error types in the application
pub trait AppError: std::error::Error + Send + Sync + 'static {
    /// Get a user-friendly error message. Never contains raw backend text.
    fn user_message(&self) -> String;

    /// Get the stable error code for callers to branch on
    fn error_code(&self) -> &'static str;

    /// Get the error category for logging
    fn error_category(&self) -> ErrorCategory;

    /// Whether an automatic retry has a chance of succeeding
    fn is_retryable(&self) -> bool {
        false
    }

    /// Get optional suggested action for the user
    fn suggested_action(&self) -> Option<String> {
        None
    }

    /// Stable kind plus human summary, safe to show to end users
    fn to_public(&self) -> PublicError {
        PublicError {
            code: self.error_code().to_string(),
            message: self.user_message(),
            suggested_action: self.suggested_action(),
        }
    }
}

/// The only error shape that leaves the crate towards end users
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicError {
    pub code: String,
    pub message: String,
    pub suggested_action: Option<String>,
}

pub mod ingestion;
pub mod queue;
pub mod storage;
pub mod store;
pub mod task;

pub use ingestion::IngestionError;
pub use queue::QueueError;
pub use storage::StorageError;
pub use store::StoreError;
pub use task::TaskError;
