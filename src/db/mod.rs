use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::info;

use crate::config::{Config, StoreBackend};
use crate::errors::StoreError;
use crate::models::{
    Comparison, ComparisonSort, ComparisonUpdate, Document, DocumentSort, DocumentUpdate, FindOptions,
    NewComparison, NewDocument, NewQueueItem, QueueItem, QueueStats, QueueStatus, RescheduleOutcome,
};

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

pub type StoreResult<T> = Result<T, StoreError>;

/// Shared handle to whichever backend was selected at startup
pub type Store = Arc<dyn EntityStore>;

#[async_trait]
pub trait DocumentRepository: Send + Sync {
    /// Fails with `ConstraintViolation` when the owner already has a document
    /// with the same content hash.
    async fn create_document(&self, new: NewDocument) -> StoreResult<Document>;

    async fn find_document(&self, id: i64) -> StoreResult<Option<Document>>;

    async fn find_document_by_hash(&self, user_id: &str, file_hash: &str) -> StoreResult<Option<Document>>;

    async fn find_documents_by_user(
        &self,
        user_id: &str,
        options: FindOptions<DocumentSort>,
    ) -> StoreResult<Vec<Document>>;

    /// Returns false when no document has this id; nothing is written then.
    async fn update_document(&self, id: i64, update: DocumentUpdate) -> StoreResult<bool>;

    /// Also removes the document's comparisons and queue items.
    async fn delete_document(&self, id: i64) -> StoreResult<bool>;
}

#[async_trait]
pub trait ComparisonRepository: Send + Sync {
    /// Both referenced documents must exist.
    async fn create_comparison(&self, new: NewComparison) -> StoreResult<Comparison>;

    async fn find_comparison(&self, id: i64) -> StoreResult<Option<Comparison>>;

    async fn find_comparisons_by_user(
        &self,
        user_id: &str,
        options: FindOptions<ComparisonSort>,
    ) -> StoreResult<Vec<Comparison>>;

    async fn update_comparison(&self, id: i64, update: ComparisonUpdate) -> StoreResult<bool>;

    async fn delete_comparison(&self, id: i64) -> StoreResult<bool>;
}

#[async_trait]
pub trait QueueRepository: Send + Sync {
    /// The referenced document must exist.
    async fn create_queue_item(&self, new: NewQueueItem) -> StoreResult<QueueItem>;

    async fn find_queue_item(&self, id: i64) -> StoreResult<Option<QueueItem>>;

    /// Select the most urgent eligible item and flip it to `processing` in one
    /// atomic step. Eligible means queued, attempts left and not scheduled
    /// after `now`; lowest priority wins, then oldest, then lowest id.
    async fn claim_next_queue_item(&self, now: DateTime<Utc>, worker_id: &str) -> StoreResult<Option<QueueItem>>;

    /// Unconditional transition. Leaving `processing` clears the claim.
    async fn set_queue_status(&self, id: i64, status: QueueStatus) -> StoreResult<bool>;

    /// Increments attempts and stores the message. Status is untouched.
    async fn record_queue_error(&self, id: i64, message: &str) -> StoreResult<Option<QueueItem>>;

    /// Put the item back in the queue for `scheduled_at`, unless it has no
    /// attempts left, in which case it is left in `failed`. Check and write
    /// happen atomically.
    async fn reschedule_queue_item(&self, id: i64, scheduled_at: DateTime<Utc>) -> StoreResult<RescheduleOutcome>;

    async fn find_queue_items_by_document(&self, document_id: i64) -> StoreResult<Vec<QueueItem>>;

    async fn find_all_queue_items(&self) -> StoreResult<Vec<QueueItem>>;

    /// Re-queue `processing` items claimed before `cutoff`.
    async fn recover_stale_claims(&self, cutoff: DateTime<Utc>) -> StoreResult<u64>;

    /// Delete `done` items last touched before `cutoff`.
    async fn purge_done_queue_items(&self, cutoff: DateTime<Utc>) -> StoreResult<u64>;

    async fn clear_queue(&self) -> StoreResult<u64>;

    async fn queue_stats(&self, now: DateTime<Utc>) -> StoreResult<QueueStats>;
}

/// One contract over every record kind, implemented once per backend
#[async_trait]
pub trait EntityStore: DocumentRepository + ComparisonRepository + QueueRepository {
    fn backend_name(&self) -> &'static str;

    /// Create the backing schema. No-op for the memory backend.
    async fn migrate(&self) -> StoreResult<()>;

    async fn shutdown(&self);
}

/// Build the backend chosen by configuration
pub async fn open_store(config: &Config) -> anyhow::Result<Store> {
    let store: Store = match config.store_backend {
        StoreBackend::Memory => Arc::new(MemoryStore::shared()),
        StoreBackend::Database => Arc::new(SqliteStore::connect(&config.database_url).await?),
    };

    info!("Entity store backend: {}", store.backend_name());
    Ok(store)
}

/// Current time at the millisecond precision both backends persist
pub fn current_timestamp() -> DateTime<Utc> {
    truncate_to_millis(Utc::now())
}

pub fn truncate_to_millis(timestamp: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(timestamp.timestamp_millis()).unwrap_or(timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn test_truncate_to_millis_drops_sub_millisecond_precision() {
        let timestamp = DateTime::from_timestamp(1_700_000_000, 123_456_789).unwrap();
        let truncated = truncate_to_millis(timestamp);
        assert_eq!(truncated.nanosecond(), 123_000_000);
        assert_eq!(truncated.timestamp(), 1_700_000_000);
    }
}
