use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use tracing::warn;

use super::helpers::{map_row_to_queue_item, to_millis, QUEUE_ITEM_FIELDS};
use super::SqliteStore;
use crate::db::{current_timestamp, QueueRepository, StoreResult};
use crate::errors::StoreError;
use crate::models::{NewQueueItem, QueueItem, QueueStats, QueueStatus, RescheduleOutcome};

const ENTITY: &str = "queue_item";

#[async_trait]
impl QueueRepository for SqliteStore {
    async fn create_queue_item(&self, new: NewQueueItem) -> StoreResult<QueueItem> {
        let now = to_millis(current_timestamp());
        let query_str = format!(
            r#"
            INSERT INTO queue_items (document_id, task_type, priority, status, attempts, max_attempts,
                                     scheduled_at, created_at, updated_at)
            VALUES (?, ?, ?, 'queued', 0, ?, ?, ?, ?)
            RETURNING {}
            "#,
            QUEUE_ITEM_FIELDS
        );

        let row = sqlx::query(&query_str)
            .bind(new.document_id)
            .bind(new.task_type.as_str())
            .bind(new.priority)
            .bind(new.max_attempts)
            .bind(new.scheduled_at.map(to_millis))
            .bind(now)
            .bind(now)
            .fetch_one(self.get_pool())
            .await
            .map_err(|e| StoreError::from_sqlx(e, "create", ENTITY))?;

        map_row_to_queue_item(&row)
    }

    async fn find_queue_item(&self, id: i64) -> StoreResult<Option<QueueItem>> {
        let query_str = format!("SELECT {} FROM queue_items WHERE id = ?", QUEUE_ITEM_FIELDS);

        let row = sqlx::query(&query_str)
            .bind(id)
            .fetch_optional(self.get_pool())
            .await
            .map_err(|e| StoreError::from_sqlx(e, "find_by_id", ENTITY))?;

        row.as_ref().map(map_row_to_queue_item).transpose()
    }

    async fn claim_next_queue_item(&self, now: DateTime<Utc>, worker_id: &str) -> StoreResult<Option<QueueItem>> {
        let now = to_millis(now);

        // A single UPDATE selects and claims; SQLite runs it under one write
        // lock, so two workers can never claim the same row.
        let query_str = format!(
            r#"
            UPDATE queue_items
            SET status = 'processing',
                claimed_at = ?1,
                worker_id = ?2,
                updated_at = ?1
            WHERE id = (
                SELECT id FROM queue_items
                WHERE status = 'queued'
                  AND attempts < max_attempts
                  AND (scheduled_at IS NULL OR scheduled_at <= ?1)
                ORDER BY priority ASC, created_at ASC, id ASC
                LIMIT 1
            )
              AND status = 'queued'
            RETURNING {}
            "#,
            QUEUE_ITEM_FIELDS
        );

        let row = sqlx::query(&query_str)
            .bind(now)
            .bind(worker_id)
            .fetch_optional(self.get_pool())
            .await
            .map_err(|e| StoreError::from_sqlx(e, "claim", ENTITY))?;

        row.as_ref().map(map_row_to_queue_item).transpose()
    }

    async fn set_queue_status(&self, id: i64, status: QueueStatus) -> StoreResult<bool> {
        let now = to_millis(current_timestamp());

        let result = sqlx::query(
            r#"
            UPDATE queue_items
            SET status = ?1,
                claimed_at = CASE WHEN ?1 = 'processing' THEN ?2 ELSE NULL END,
                worker_id = CASE WHEN ?1 = 'processing' THEN worker_id ELSE NULL END,
                updated_at = ?2
            WHERE id = ?3
            "#,
        )
        .bind(status.as_str())
        .bind(now)
        .bind(id)
        .execute(self.get_pool())
        .await
        .map_err(|e| StoreError::from_sqlx(e, "update_status", ENTITY))?;

        Ok(result.rows_affected() == 1)
    }

    async fn record_queue_error(&self, id: i64, message: &str) -> StoreResult<Option<QueueItem>> {
        let query_str = format!(
            r#"
            UPDATE queue_items
            SET attempts = attempts + 1,
                error_message = ?,
                updated_at = ?
            WHERE id = ?
            RETURNING {}
            "#,
            QUEUE_ITEM_FIELDS
        );

        let row = sqlx::query(&query_str)
            .bind(message)
            .bind(to_millis(current_timestamp()))
            .bind(id)
            .fetch_optional(self.get_pool())
            .await
            .map_err(|e| StoreError::from_sqlx(e, "update_error", ENTITY))?;

        row.as_ref().map(map_row_to_queue_item).transpose()
    }

    async fn reschedule_queue_item(&self, id: i64, scheduled_at: DateTime<Utc>) -> StoreResult<RescheduleOutcome> {
        let query_str = format!(
            r#"
            UPDATE queue_items
            SET status = CASE
                    WHEN attempts < max_attempts THEN 'queued'
                    WHEN status = 'done' THEN 'done'
                    ELSE 'failed'
                END,
                scheduled_at = CASE WHEN attempts < max_attempts THEN ?1 ELSE scheduled_at END,
                claimed_at = NULL,
                worker_id = NULL,
                updated_at = ?2
            WHERE id = ?3
            RETURNING {}
            "#,
            QUEUE_ITEM_FIELDS
        );

        let row = sqlx::query(&query_str)
            .bind(to_millis(scheduled_at))
            .bind(to_millis(current_timestamp()))
            .bind(id)
            .fetch_optional(self.get_pool())
            .await
            .map_err(|e| StoreError::from_sqlx(e, "retry", ENTITY))?;

        let Some(row) = row else {
            return Ok(RescheduleOutcome::NotFound);
        };

        let item = map_row_to_queue_item(&row)?;
        if item.has_attempts_left() {
            Ok(RescheduleOutcome::Rescheduled(item))
        } else {
            warn!(
                queue_id = item.id,
                attempts = item.attempts,
                max_attempts = item.max_attempts,
                "Refusing to reschedule exhausted queue item"
            );
            Ok(RescheduleOutcome::LimitReached(item))
        }
    }

    async fn find_queue_items_by_document(&self, document_id: i64) -> StoreResult<Vec<QueueItem>> {
        let query_str = format!(
            "SELECT {} FROM queue_items WHERE document_id = ? ORDER BY created_at DESC, id DESC",
            QUEUE_ITEM_FIELDS
        );

        let rows = sqlx::query(&query_str)
            .bind(document_id)
            .fetch_all(self.get_pool())
            .await
            .map_err(|e| StoreError::from_sqlx(e, "find_by_document", ENTITY))?;

        rows.iter().map(map_row_to_queue_item).collect()
    }

    async fn find_all_queue_items(&self) -> StoreResult<Vec<QueueItem>> {
        let query_str = format!(
            "SELECT {} FROM queue_items ORDER BY created_at DESC, id DESC",
            QUEUE_ITEM_FIELDS
        );

        let rows = sqlx::query(&query_str)
            .fetch_all(self.get_pool())
            .await
            .map_err(|e| StoreError::from_sqlx(e, "find_all", ENTITY))?;

        rows.iter().map(map_row_to_queue_item).collect()
    }

    async fn recover_stale_claims(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE queue_items
            SET status = CASE WHEN attempts < max_attempts THEN 'queued' ELSE 'failed' END,
                claimed_at = NULL,
                worker_id = NULL,
                updated_at = ?
            WHERE status = 'processing'
              AND claimed_at < ?
            "#,
        )
        .bind(to_millis(current_timestamp()))
        .bind(to_millis(cutoff))
        .execute(self.get_pool())
        .await
        .map_err(|e| StoreError::from_sqlx(e, "recover_stale", ENTITY))?;

        Ok(result.rows_affected())
    }

    async fn purge_done_queue_items(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM queue_items WHERE status = 'done' AND updated_at < ?")
            .bind(to_millis(cutoff))
            .execute(self.get_pool())
            .await
            .map_err(|e| StoreError::from_sqlx(e, "purge", ENTITY))?;

        Ok(result.rows_affected())
    }

    async fn clear_queue(&self) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM queue_items")
            .execute(self.get_pool())
            .await
            .map_err(|e| StoreError::from_sqlx(e, "clear", ENTITY))?;

        Ok(result.rows_affected())
    }

    async fn queue_stats(&self, now: DateTime<Utc>) -> StoreResult<QueueStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN status = 'queued' AND attempts < max_attempts AND (scheduled_at IS NULL OR scheduled_at <= ?1) THEN 1 ELSE 0 END), 0) AS ready_count,
                COALESCE(SUM(CASE WHEN status = 'queued' AND attempts < max_attempts AND scheduled_at > ?1 THEN 1 ELSE 0 END), 0) AS scheduled_count,
                COALESCE(SUM(CASE WHEN status = 'processing' THEN 1 ELSE 0 END), 0) AS processing_count,
                COALESCE(SUM(CASE WHEN status = 'done' THEN 1 ELSE 0 END), 0) AS done_count,
                COALESCE(SUM(CASE WHEN status = 'failed' OR (status = 'queued' AND attempts >= max_attempts) THEN 1 ELSE 0 END), 0) AS failed_count
            FROM queue_items
            "#,
        )
        .bind(to_millis(now))
        .fetch_one(self.get_pool())
        .await
        .map_err(|e| StoreError::from_sqlx(e, "stats", ENTITY))?;

        let count = |column: &'static str| -> StoreResult<i64> {
            row.try_get::<i64, _>(column)
                .map_err(|e| StoreError::decode(ENTITY, column, e.to_string()))
        };

        Ok(QueueStats {
            ready_count: count("ready_count")?,
            scheduled_count: count("scheduled_count")?,
            processing_count: count("processing_count")?,
            done_count: count("done_count")?,
            failed_count: count("failed_count")?,
        })
    }
}
