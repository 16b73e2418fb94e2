use async_trait::async_trait;
use sqlx::{QueryBuilder, Sqlite};

use super::helpers::{limit_value, map_row_to_document, to_json, to_millis, DOCUMENT_FIELDS};
use super::SqliteStore;
use crate::db::{current_timestamp, DocumentRepository, StoreResult};
use crate::errors::StoreError;
use crate::models::{Document, DocumentSort, DocumentUpdate, FindOptions, NewDocument, SortColumn};

const ENTITY: &str = "document";

/// JSON path for one top-level key, quoted so dots in the key are literal
fn json_path_for_key(key: &str) -> String {
    format!("$.\"{}\"", key)
}

#[async_trait]
impl DocumentRepository for SqliteStore {
    async fn create_document(&self, new: NewDocument) -> StoreResult<Document> {
        let now = to_millis(current_timestamp());
        let metadata = to_json(ENTITY, "metadata", &new.metadata)?;

        let query_str = format!(
            r#"
            INSERT INTO documents (filename, original_filename, file_hash, storage_url, file_size,
                                   user_id, status, extracted_text, is_reference, metadata,
                                   created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, NULL, ?, ?, ?, ?)
            RETURNING {}
            "#,
            DOCUMENT_FIELDS
        );

        let row = sqlx::query(&query_str)
            .bind(&new.filename)
            .bind(&new.original_filename)
            .bind(&new.file_hash)
            .bind(&new.storage_url)
            .bind(new.file_size)
            .bind(&new.user_id)
            .bind(new.status.as_str())
            .bind(new.is_reference)
            .bind(metadata)
            .bind(now)
            .bind(now)
            .fetch_one(self.get_pool())
            .await
            .map_err(|e| StoreError::from_sqlx(e, "create", ENTITY))?;

        map_row_to_document(&row)
    }

    async fn find_document(&self, id: i64) -> StoreResult<Option<Document>> {
        let query_str = format!("SELECT {} FROM documents WHERE id = ?", DOCUMENT_FIELDS);

        let row = sqlx::query(&query_str)
            .bind(id)
            .fetch_optional(self.get_pool())
            .await
            .map_err(|e| StoreError::from_sqlx(e, "find_by_id", ENTITY))?;

        row.as_ref().map(map_row_to_document).transpose()
    }

    async fn find_document_by_hash(&self, user_id: &str, file_hash: &str) -> StoreResult<Option<Document>> {
        let query_str = format!(
            "SELECT {} FROM documents WHERE user_id = ? AND file_hash = ?",
            DOCUMENT_FIELDS
        );

        let row = sqlx::query(&query_str)
            .bind(user_id)
            .bind(file_hash)
            .fetch_optional(self.get_pool())
            .await
            .map_err(|e| StoreError::from_sqlx(e, "find_by_hash", ENTITY))?;

        row.as_ref().map(map_row_to_document).transpose()
    }

    async fn find_documents_by_user(
        &self,
        user_id: &str,
        options: FindOptions<DocumentSort>,
    ) -> StoreResult<Vec<Document>> {
        // Column and direction come from closed enums, never from caller text
        let query_str = format!(
            "SELECT {fields} FROM documents WHERE user_id = ? ORDER BY {column} {direction}, id {direction} LIMIT ? OFFSET ?",
            fields = DOCUMENT_FIELDS,
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

        rows.iter().map(map_row_to_document).collect()
    }

    async fn update_document(&self, id: i64, update: DocumentUpdate) -> StoreResult<bool> {
        let mut query = QueryBuilder::<Sqlite>::new("UPDATE documents SET updated_at = ");
        query.push_bind(to_millis(current_timestamp()));

        if let Some(filename) = update.filename {
            query.push(", filename = ").push_bind(filename);
        }
        if let Some(original_filename) = update.original_filename {
            query.push(", original_filename = ").push_bind(original_filename);
        }
        if let Some(file_hash) = update.file_hash {
            query.push(", file_hash = ").push_bind(file_hash);
        }
        if let Some(storage_url) = update.storage_url {
            query.push(", storage_url = ").push_bind(storage_url);
        }
        if let Some(file_size) = update.file_size {
            query.push(", file_size = ").push_bind(file_size);
        }
        if let Some(status) = update.status {
            query.push(", status = ").push_bind(status.as_str());
        }
        if let Some(extracted_text) = update.extracted_text {
            query.push(", extracted_text = ").push_bind(extracted_text);
        }
        if let Some(is_reference) = update.is_reference {
            query.push(", is_reference = ").push_bind(is_reference);
        }
        match (update.metadata, update.merge_metadata) {
            (Some(metadata), None) => {
                query.push(", metadata = ").push_bind(to_json(ENTITY, "metadata", &metadata)?);
            }
            (metadata, Some(entries)) if !entries.is_empty() => {
                // json_set(json_set(base, path, value), ...) so the merge
                // happens inside the UPDATE against the current row
                query.push(", metadata = ");
                for _ in 0..entries.len() {
                    query.push("json_set(");
                }
                match metadata {
                    Some(metadata) => {
                        query.push("json(").push_bind(to_json(ENTITY, "metadata", &metadata)?).push(")");
                    }
                    None => {
                        query.push("CASE WHEN json_type(metadata) = 'object' THEN metadata ELSE '{}' END");
                    }
                }
                for (key, value) in &entries {
                    query
                        .push(", ")
                        .push_bind(json_path_for_key(key))
                        .push(", json(")
                        .push_bind(to_json(ENTITY, "metadata", value)?)
                        .push("))");
                }
            }
            (Some(metadata), Some(_)) => {
                query.push(", metadata = ").push_bind(to_json(ENTITY, "metadata", &metadata)?);
            }
            (None, _) => {}
        }

        query.push(" WHERE id = ").push_bind(id);

        let result = query
            .build()
            .execute(self.get_pool())
            .await
            .map_err(|e| StoreError::from_sqlx(e, "update", ENTITY))?;

        Ok(result.rows_affected() == 1)
    }

    async fn delete_document(&self, id: i64) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(self.get_pool())
            .await
            .map_err(|e| StoreError::from_sqlx(e, "delete", ENTITY))?;

        Ok(result.rows_affected() == 1)
    }
}
