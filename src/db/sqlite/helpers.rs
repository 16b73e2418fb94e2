use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite};

use crate::db::StoreResult;
use crate::errors::StoreError;
use crate::models::{Comparison, ComparisonResult, Document, QueueItem};

/// Standard document fields for SELECT / RETURNING clauses
pub const DOCUMENT_FIELDS: &str = r#"
    id, filename, original_filename, file_hash, storage_url, file_size,
    user_id, status, extracted_text, is_reference, metadata, created_at, updated_at
"#;

pub const COMPARISON_FIELDS: &str = r#"
    id, user_id, reference_document_id, target_document_id, result, status,
    error_message, processing_time_ms, created_at, updated_at
"#;

pub const QUEUE_ITEM_FIELDS: &str = r#"
    id, document_id, task_type, priority, status, attempts, max_attempts,
    scheduled_at, error_message, claimed_at, worker_id, created_at, updated_at
"#;

/// Timestamps are persisted as unix milliseconds
pub fn to_millis(timestamp: DateTime<Utc>) -> i64 {
    timestamp.timestamp_millis()
}

fn from_millis(entity: &'static str, column: &'static str, millis: i64) -> StoreResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| StoreError::decode(entity, column, format!("timestamp {} out of range", millis)))
}

fn get<'r, T>(row: &'r SqliteRow, entity: &'static str, column: &'static str) -> StoreResult<T>
where
    T: sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
{
    row.try_get::<T, _>(column)
        .map_err(|e| StoreError::decode(entity, column, e.to_string()))
}

fn get_timestamp(row: &SqliteRow, entity: &'static str, column: &'static str) -> StoreResult<DateTime<Utc>> {
    let millis: i64 = get(row, entity, column)?;
    from_millis(entity, column, millis)
}

fn get_optional_timestamp(
    row: &SqliteRow,
    entity: &'static str,
    column: &'static str,
) -> StoreResult<Option<DateTime<Utc>>> {
    let millis: Option<i64> = get(row, entity, column)?;
    millis.map(|m| from_millis(entity, column, m)).transpose()
}

fn get_parsed<T>(row: &SqliteRow, entity: &'static str, column: &'static str) -> StoreResult<T>
where
    T: std::str::FromStr<Err = String>,
{
    let raw: String = get(row, entity, column)?;
    raw.parse::<T>().map_err(|e| StoreError::decode(entity, column, e))
}

pub fn to_json<T: serde::Serialize>(entity: &'static str, column: &'static str, value: &T) -> StoreResult<String> {
    serde_json::to_string(value).map_err(|e| StoreError::decode(entity, column, e.to_string()))
}

/// Maps a database row to a Document
pub fn map_row_to_document(row: &SqliteRow) -> StoreResult<Document> {
    const ENTITY: &str = "document";

    let metadata: String = get(row, ENTITY, "metadata")?;
    let metadata = serde_json::from_str(&metadata).map_err(|e| StoreError::decode(ENTITY, "metadata", e.to_string()))?;

    Ok(Document {
        id: get(row, ENTITY, "id")?,
        filename: get(row, ENTITY, "filename")?,
        original_filename: get(row, ENTITY, "original_filename")?,
        file_hash: get(row, ENTITY, "file_hash")?,
        storage_url: get(row, ENTITY, "storage_url")?,
        file_size: get(row, ENTITY, "file_size")?,
        user_id: get(row, ENTITY, "user_id")?,
        status: get_parsed(row, ENTITY, "status")?,
        extracted_text: get(row, ENTITY, "extracted_text")?,
        is_reference: get(row, ENTITY, "is_reference")?,
        metadata,
        created_at: get_timestamp(row, ENTITY, "created_at")?,
        updated_at: get_timestamp(row, ENTITY, "updated_at")?,
    })
}

pub fn map_row_to_comparison(row: &SqliteRow) -> StoreResult<Comparison> {
    const ENTITY: &str = "comparison";

    let result: Option<String> = get(row, ENTITY, "result")?;
    let result = result
        .map(|raw| serde_json::from_str::<ComparisonResult>(&raw))
        .transpose()
        .map_err(|e| StoreError::decode(ENTITY, "result", e.to_string()))?;

    Ok(Comparison {
        id: get(row, ENTITY, "id")?,
        user_id: get(row, ENTITY, "user_id")?,
        reference_document_id: get(row, ENTITY, "reference_document_id")?,
        target_document_id: get(row, ENTITY, "target_document_id")?,
        result,
        status: get_parsed(row, ENTITY, "status")?,
        error_message: get(row, ENTITY, "error_message")?,
        processing_time_ms: get(row, ENTITY, "processing_time_ms")?,
        created_at: get_timestamp(row, ENTITY, "created_at")?,
        updated_at: get_timestamp(row, ENTITY, "updated_at")?,
    })
}

pub fn map_row_to_queue_item(row: &SqliteRow) -> StoreResult<QueueItem> {
    const ENTITY: &str = "queue_item";

    Ok(QueueItem {
        id: get(row, ENTITY, "id")?,
        document_id: get(row, ENTITY, "document_id")?,
        task_type: get_parsed(row, ENTITY, "task_type")?,
        priority: get(row, ENTITY, "priority")?,
        status: get_parsed(row, ENTITY, "status")?,
        attempts: get(row, ENTITY, "attempts")?,
        max_attempts: get(row, ENTITY, "max_attempts")?,
        scheduled_at: get_optional_timestamp(row, ENTITY, "scheduled_at")?,
        error_message: get(row, ENTITY, "error_message")?,
        claimed_at: get_optional_timestamp(row, ENTITY, "claimed_at")?,
        worker_id: get(row, ENTITY, "worker_id")?,
        created_at: get_timestamp(row, ENTITY, "created_at")?,
        updated_at: get_timestamp(row, ENTITY, "updated_at")?,
    })
}

/// SQLite treats a negative LIMIT as "no limit"
pub fn limit_value(limit: Option<u32>) -> i64 {
    limit.map(i64::from).unwrap_or(-1)
}
