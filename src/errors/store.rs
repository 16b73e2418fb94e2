use thiserror::Error;

use super::{AppError, ErrorCategory};

/// Errors raised by the entity store backends.
///
/// Absence is not an error: lookups return `Ok(None)`. `NotFound` is only
/// produced by operations that require the record to exist.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Connection failure during {operation} on {entity}: {details}")]
    Connection {
        operation: &'static str,
        entity: &'static str,
        details: String,
    },

    #[error("Constraint violation during {operation} on {entity}: {details}")]
    ConstraintViolation {
        operation: &'static str,
        entity: &'static str,
        details: String,
    },

    #[error("{entity} with ID {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("Query failed during {operation} on {entity}: {details}")]
    Query {
        operation: &'static str,
        entity: &'static str,
        details: String,
    },

    #[error("Failed to decode {entity}.{column}: {details}")]
    Decode {
        entity: &'static str,
        column: &'static str,
        details: String,
    },
}

impl StoreError {
    pub fn constraint(operation: &'static str, entity: &'static str, details: impl Into<String>) -> Self {
        Self::ConstraintViolation {
            operation,
            entity,
            details: details.into(),
        }
    }

    pub fn decode(entity: &'static str, column: &'static str, details: impl Into<String>) -> Self {
        Self::Decode {
            entity,
            column,
            details: details.into(),
        }
    }

    /// Classify a sqlx error, attaching the operation and entity it happened in
    pub fn from_sqlx(error: sqlx::Error, operation: &'static str, entity: &'static str) -> Self {
        match error {
            sqlx::Error::Database(db_error) => {
                if db_error.is_unique_violation()
                    || db_error.is_foreign_key_violation()
                    || db_error.is_check_violation()
                {
                    return Self::ConstraintViolation {
                        operation,
                        entity,
                        details: db_error.message().to_string(),
                    };
                }

                // SQLITE_BUSY (5) and SQLITE_LOCKED (6), including their extended
                // codes, clear once the other writer finishes
                let primary_code = db_error
                    .code()
                    .and_then(|code| code.parse::<i32>().ok())
                    .map(|code| code & 0xff);
                let is_busy = matches!(primary_code, Some(5) | Some(6))
                    || db_error.message().contains("database is locked");
                if is_busy {
                    Self::Connection {
                        operation,
                        entity,
                        details: db_error.message().to_string(),
                    }
                } else {
                    Self::Query {
                        operation,
                        entity,
                        details: db_error.message().to_string(),
                    }
                }
            }
            sqlx::Error::Io(e) => Self::Connection {
                operation,
                entity,
                details: e.to_string(),
            },
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::WorkerCrashed => {
                Self::Connection {
                    operation,
                    entity,
                    details: error.to_string(),
                }
            }
            sqlx::Error::Tls(e) => Self::Connection {
                operation,
                entity,
                details: e.to_string(),
            },
            sqlx::Error::ColumnDecode { index, source } => Self::Decode {
                entity,
                column: "unknown",
                details: format!("{}: {}", index, source),
            },
            other => Self::Query {
                operation,
                entity,
                details: other.to_string(),
            },
        }
    }

    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, StoreError::ConstraintViolation { .. })
    }

    pub fn is_connection_error(&self) -> bool {
        matches!(self, StoreError::Connection { .. })
    }
}

impl AppError for StoreError {
    fn user_message(&self) -> String {
        match self {
            StoreError::Connection { .. } => "The database is temporarily unavailable".to_string(),
            StoreError::ConstraintViolation { entity, .. } => {
                format!("The {} conflicts with an existing record", entity)
            }
            StoreError::NotFound { entity, .. } => format!("The requested {} was not found", entity),
            StoreError::Query { .. } => "A database operation failed".to_string(),
            StoreError::Decode { .. } => "Stored data could not be read".to_string(),
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            StoreError::Connection { .. } => "STORE_CONNECTION_FAILED",
            StoreError::ConstraintViolation { .. } => "STORE_CONSTRAINT_VIOLATION",
            StoreError::NotFound { .. } => "STORE_NOT_FOUND",
            StoreError::Query { .. } => "STORE_QUERY_FAILED",
            StoreError::Decode { .. } => "STORE_DECODE_FAILED",
        }
    }

    fn error_category(&self) -> ErrorCategory {
        ErrorCategory::Database
    }

    fn is_retryable(&self) -> bool {
        self.is_connection_error()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_timeout_is_connection_class() {
        let error = StoreError::from_sqlx(sqlx::Error::PoolTimedOut, "create", "document");
        assert!(error.is_connection_error());
        assert!(error.is_retryable());
        assert_eq!(error.error_code(), "STORE_CONNECTION_FAILED");
    }

    #[test]
    fn test_row_not_found_is_not_retryable() {
        let error = StoreError::from_sqlx(sqlx::Error::RowNotFound, "update", "queue_item");
        assert!(!error.is_retryable());
        assert!(error.to_string().contains("update"));
        assert!(error.to_string().contains("queue_item"));
    }

    #[test]
    fn test_user_message_hides_details() {
        let error = StoreError::constraint("create", "document", "UNIQUE constraint failed: documents.user_id, documents.file_hash");
        assert!(error.is_constraint_violation());
        assert!(!error.user_message().contains("UNIQUE"));
        assert_eq!(error.to_public().code, "STORE_CONSTRAINT_VIOLATION");
    }
}
