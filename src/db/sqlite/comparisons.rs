use async_trait::async_trait;
use sqlx::{QueryBuilder, Sqlite};

use super::helpers::{limit_value, map_row_to_comparison, to_json, to_millis, COMPARISON_FIELDS};
use super::SqliteStore;
use crate::db::{current_timestamp, ComparisonRepository, StoreResult};
use crate::errors::StoreError;
use crate::models::{
    Comparison, ComparisonSort, ComparisonStatus, ComparisonUpdate, FindOptions, NewComparison, SortColumn,
};

const ENTITY: &str = "comparison";

#[async_trait]
impl ComparisonRepository for SqliteStore {
    async fn create_comparison(&self, new: NewComparison) -> StoreResult<Comparison> {
        let now = to_millis(current_timestamp());
        let query_str = format!(
            r#"
            INSERT INTO comparisons (user_id, reference_document_id, target_document_id, status,
                                     created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING {}
            "#,
            COMPARISON_FIELDS
        );

        let row = sqlx::query(&query_str)
            .bind(&new.user_id)
            .bind(new.reference_document_id)
            .bind(new.target_document_id)
            .bind(ComparisonStatus::Pending.as_str())
            .bind(now)
            .bind(now)
            .fetch_one(self.get_pool())
            .await
            .map_err(|e| StoreError::from_sqlx(e, "create", ENTITY))?;

        map_row_to_comparison(&row)
    }

    async fn find_comparison(&self, id: i64) -> StoreResult<Option<Comparison>> {
        let query_str = format!("SELECT {} FROM comparisons WHERE id = ?", COMPARISON_FIELDS);

        let row = sqlx::query(&query_str)
            .bind(id)
            .fetch_optional(self.get_pool())
            .await
            .map_err(|e| StoreError::from_sqlx(e, "find_by_id", ENTITY))?;

        row.as_ref().map(map_row_to_comparison).transpose()
    }

    async fn find_comparisons_by_user(
        &self,
        user_id: &str,
        options: FindOptions<ComparisonSort>,
    ) -> StoreResult<Vec<Comparison>> {
        let query_str = format!(
            "SELECT {fields} FROM comparisons WHERE user_id = ? ORDER BY {column} {direction}, id {direction} LIMIT ? OFFSET ?",
            fields = COMPARISON_FIELDS,
            column = options.order_by.column(),
            direction = options.direction.as_sql(),
        );

        let rows = sqlx::query(&query_str)
            .bind(user_id)
            .bind(limit_value(options.limit))
            .bind(i64::from(options.offset))
            .fetch_all(self.get_pool())
            .await
            .map_err(|e| StoreError::from_sqlx(e, "find_by_user", ENTITY))?;

        rows.iter().map(map_row_to_comparison).collect()
    }

    async fn update_comparison(&self, id: i64, update: ComparisonUpdate) -> StoreResult<bool> {
        let mut query = QueryBuilder::<Sqlite>::new("UPDATE comparisons SET updated_at = ");
        query.push_bind(to_millis(current_timestamp()));

        if let Some(status) = update.status {
            query.push(", status = ").push_bind(status.as_str());
        }
        if let Some(result) = update.result {
            let result = result.map(|r| to_json(ENTITY, "result", &r)).transpose()?;
            query.push(", result = ").push_bind(result);
        }
        if let Some(error_message) = update.error_message {
            query.push(", error_message = ").push_bind(error_message);
        }
        if let Some(processing_time_ms) = update.processing_time_ms {
            query.push(", processing_time_ms = ").push_bind(processing_time_ms);
        }

        query.push(" WHERE id = ").push_bind(id);

        let result = query
            .build()
            .execute(self.get_pool())
            .await
            .map_err(|e| StoreError::from_sqlx(e, "update", ENTITY))?;

        Ok(result.rows_affected() == 1)
    }

    async fn delete_comparison(&self, id: i64) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM comparisons WHERE id = ?")
            .bind(id)
            .execute(self.get_pool())
            .await
            .map_err(|e| StoreError::from_sqlx(e, "delete", ENTITY))?;

        Ok(result.rows_affected() == 1)
    }
}
