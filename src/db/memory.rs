/*!
 * In-process entity store
 *
 * Keeps every record kind in ordered maps behind a single async mutex. It
 * reproduces the relational backend's semantics exactly: generated ids never
 * reused, unique (owner, hash) documents, foreign keys with cascading delete,
 * ORDER BY with an id tiebreaker and LIMIT/OFFSET paging.
 */

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{
    current_timestamp, truncate_to_millis, ComparisonRepository, DocumentRepository, EntityStore,
    QueueRepository, StoreResult,
};
use crate::errors::StoreError;
use crate::models::{
    Comparison, ComparisonSort, ComparisonUpdate, Document, DocumentSort, DocumentUpdate, FindOptions,
    NewComparison, NewDocument, NewQueueItem, QueueItem, QueueStats, QueueStatus, RescheduleOutcome,
    SortDirection,
};

static SHARED_MEMORY_STORE: OnceLock<MemoryStore> = OnceLock::new();

#[derive(Default)]
struct MemoryTables {
    documents: BTreeMap<i64, Document>,
    comparisons: BTreeMap<i64, Comparison>,
    queue_items: BTreeMap<i64, QueueItem>,
    last_document_id: i64,
    last_comparison_id: i64,
    last_queue_item_id: i64,
}

impl MemoryTables {
    fn hash_taken(&self, user_id: &str, file_hash: &str, except_id: Option<i64>) -> bool {
        self.documents
            .values()
            .any(|d| d.user_id == user_id && d.file_hash == file_hash && Some(d.id) != except_id)
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<MemoryTables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide instance, created on first use. Every caller shares
    /// the same maps, so components built separately see the same records.
    pub fn shared() -> Self {
        SHARED_MEMORY_STORE.get_or_init(MemoryStore::new).clone()
    }

    /// Drop every record and restart id generation
    pub async fn reset(&self) {
        let mut tables = self.tables.lock().await;
        *tables = MemoryTables::default();
        debug!("Memory store reset");
    }
}

fn paginate<T>(items: Vec<T>, limit: Option<u32>, offset: u32) -> Vec<T> {
    let limit = limit.map(|l| l as usize).unwrap_or(usize::MAX);
    items.into_iter().skip(offset as usize).take(limit).collect()
}

fn directed(ordering: Ordering, direction: SortDirection) -> Ordering {
    match direction {
        SortDirection::Asc => ordering,
        SortDirection::Desc => ordering.reverse(),
    }
}

fn compare_documents(a: &Document, b: &Document, sort: DocumentSort) -> Ordering {
    let primary = match sort {
        DocumentSort::CreatedAt => a.created_at.cmp(&b.created_at),
        DocumentSort::UpdatedAt => a.updated_at.cmp(&b.updated_at),
        DocumentSort::OriginalFilename => a.original_filename.cmp(&b.original_filename),
        DocumentSort::FileSize => a.file_size.cmp(&b.file_size),
    };
    primary.then(a.id.cmp(&b.id))
}

fn compare_comparisons(a: &Comparison, b: &Comparison, sort: ComparisonSort) -> Ordering {
    let primary = match sort {
        ComparisonSort::CreatedAt => a.created_at.cmp(&b.created_at),
        ComparisonSort::UpdatedAt => a.updated_at.cmp(&b.updated_at),
    };
    primary.then(a.id.cmp(&b.id))
}

/// Claim order: priority ascending, then oldest first, then lowest id
fn compare_claim_order(a: &QueueItem, b: &QueueItem) -> Ordering {
    a.priority
        .cmp(&b.priority)
        .then(a.created_at.cmp(&b.created_at))
        .then(a.id.cmp(&b.id))
}

fn newest_first(a: &QueueItem, b: &QueueItem) -> Ordering {
    b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id))
}

fn release_claim(item: &mut QueueItem) {
    item.claimed_at = None;
    item.worker_id = None;
}

#[async_trait]
impl DocumentRepository for MemoryStore {
    async fn create_document(&self, new: NewDocument) -> StoreResult<Document> {
        let mut tables = self.tables.lock().await;

        if tables.hash_taken(&new.user_id, &new.file_hash, None) {
            return Err(StoreError::constraint(
                "create",
                "document",
                format!("user {} already has a document with hash {}", new.user_id, new.file_hash),
            ));
        }

        tables.last_document_id += 1;
        let document = new.into_document(tables.last_document_id, current_timestamp());
        tables.documents.insert(document.id, document.clone());
        Ok(document)
    }

    async fn find_document(&self, id: i64) -> StoreResult<Option<Document>> {
        let tables = self.tables.lock().await;
        Ok(tables.documents.get(&id).cloned())
    }

    async fn find_document_by_hash(&self, user_id: &str, file_hash: &str) -> StoreResult<Option<Document>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .documents
            .values()
            .find(|d| d.user_id == user_id && d.file_hash == file_hash)
            .cloned())
    }

    async fn find_documents_by_user(
        &self,
        user_id: &str,
        options: FindOptions<DocumentSort>,
    ) -> StoreResult<Vec<Document>> {
        let tables = self.tables.lock().await;
        let mut documents: Vec<Document> = tables
            .documents
            .values()
            .filter(|d| d.user_id == user_id)
            .cloned()
            .collect();
        documents.sort_by(|a, b| directed(compare_documents(a, b, options.order_by), options.direction));
        Ok(paginate(documents, options.limit, options.offset))
    }

    async fn update_document(&self, id: i64, update: DocumentUpdate) -> StoreResult<bool> {
        let mut tables = self.tables.lock().await;

        let Some(existing) = tables.documents.get(&id) else {
            return Ok(false);
        };

        let mut updated = existing.clone();
        update.apply_to(&mut updated, current_timestamp());

        if tables.hash_taken(&updated.user_id, &updated.file_hash, Some(id)) {
            return Err(StoreError::constraint(
                "update",
                "document",
                format!("user {} already has a document with hash {}", updated.user_id, updated.file_hash),
            ));
        }

        tables.documents.insert(id, updated);
        Ok(true)
    }

    async fn delete_document(&self, id: i64) -> StoreResult<bool> {
        let mut tables = self.tables.lock().await;

        if tables.documents.remove(&id).is_none() {
            return Ok(false);
        }

        tables
            .comparisons
            .retain(|_, c| c.reference_document_id != id && c.target_document_id != id);
        tables.queue_items.retain(|_, q| q.document_id != id);
        Ok(true)
    }
}

#[async_trait]
impl ComparisonRepository for MemoryStore {
    async fn create_comparison(&self, new: NewComparison) -> StoreResult<Comparison> {
        let mut tables = self.tables.lock().await;

        for document_id in [new.reference_document_id, new.target_document_id] {
            if !tables.documents.contains_key(&document_id) {
                return Err(StoreError::constraint(
                    "create",
                    "comparison",
                    format!("document {} does not exist", document_id),
                ));
            }
        }

        tables.last_comparison_id += 1;
        let comparison = new.into_comparison(tables.last_comparison_id, current_timestamp());
        tables.comparisons.insert(comparison.id, comparison.clone());
        Ok(comparison)
    }

    async fn find_comparison(&self, id: i64) -> StoreResult<Option<Comparison>> {
        let tables = self.tables.lock().await;
        Ok(tables.comparisons.get(&id).cloned())
    }

    async fn find_comparisons_by_user(
        &self,
        user_id: &str,
        options: FindOptions<ComparisonSort>,
    ) -> StoreResult<Vec<Comparison>> {
        let tables = self.tables.lock().await;
        let mut comparisons: Vec<Comparison> = tables
            .comparisons
            .values()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect();
        comparisons.sort_by(|a, b| directed(compare_comparisons(a, b, options.order_by), options.direction));
        Ok(paginate(comparisons, options.limit, options.offset))
    }

    async fn update_comparison(&self, id: i64, update: ComparisonUpdate) -> StoreResult<bool> {
        let mut tables = self.tables.lock().await;
        match tables.comparisons.get_mut(&id) {
            Some(comparison) => {
                update.apply_to(comparison, current_timestamp());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_comparison(&self, id: i64) -> StoreResult<bool> {
        let mut tables = self.tables.lock().await;
        Ok(tables.comparisons.remove(&id).is_some())
    }
}

#[async_trait]
impl QueueRepository for MemoryStore {
    async fn create_queue_item(&self, mut new: NewQueueItem) -> StoreResult<QueueItem> {
        let mut tables = self.tables.lock().await;

        if !tables.documents.contains_key(&new.document_id) {
            return Err(StoreError::constraint(
                "create",
                "queue_item",
                format!("document {} does not exist", new.document_id),
            ));
        }

        new.scheduled_at = new.scheduled_at.map(truncate_to_millis);
        tables.last_queue_item_id += 1;
        let item = new.into_queue_item(tables.last_queue_item_id, current_timestamp());
        tables.queue_items.insert(item.id, item.clone());
        Ok(item)
    }

    async fn find_queue_item(&self, id: i64) -> StoreResult<Option<QueueItem>> {
        let tables = self.tables.lock().await;
        Ok(tables.queue_items.get(&id).cloned())
    }

    async fn claim_next_queue_item(&self, now: DateTime<Utc>, worker_id: &str) -> StoreResult<Option<QueueItem>> {
        let now = truncate_to_millis(now);
        let mut tables = self.tables.lock().await;

        // Selection and status flip happen under the same lock
        let next_id = tables
            .queue_items
            .values()
            .filter(|item| item.is_eligible(now))
            .min_by(|a, b| compare_claim_order(a, b))
            .map(|item| item.id);

        let Some(id) = next_id else {
            return Ok(None);
        };

        let Some(item) = tables.queue_items.get_mut(&id) else {
            return Ok(None);
        };
        item.status = QueueStatus::Processing;
        item.claimed_at = Some(now);
        item.worker_id = Some(worker_id.to_string());
        item.updated_at = now;
        Ok(Some(item.clone()))
    }

    async fn set_queue_status(&self, id: i64, status: QueueStatus) -> StoreResult<bool> {
        let now = current_timestamp();
        let mut tables = self.tables.lock().await;
        let Some(item) = tables.queue_items.get_mut(&id) else {
            return Ok(false);
        };

        item.status = status;
        if status == QueueStatus::Processing {
            item.claimed_at = Some(now);
        } else {
            release_claim(item);
        }
        item.updated_at = now;
        Ok(true)
    }

    async fn record_queue_error(&self, id: i64, message: &str) -> StoreResult<Option<QueueItem>> {
        let now = current_timestamp();
        let mut tables = self.tables.lock().await;
        let Some(item) = tables.queue_items.get_mut(&id) else {
            return Ok(None);
        };

        item.attempts += 1;
        item.error_message = Some(message.to_string());
        item.updated_at = now;
        Ok(Some(item.clone()))
    }

    async fn reschedule_queue_item(&self, id: i64, scheduled_at: DateTime<Utc>) -> StoreResult<RescheduleOutcome> {
        let now = current_timestamp();
        let mut tables = self.tables.lock().await;
        let Some(item) = tables.queue_items.get_mut(&id) else {
            return Ok(RescheduleOutcome::NotFound);
        };

        release_claim(item);
        item.updated_at = now;

        if !item.has_attempts_left() {
            if item.status != QueueStatus::Done {
                item.status = QueueStatus::Failed;
            }
            warn!(
                queue_id = item.id,
                attempts = item.attempts,
                max_attempts = item.max_attempts,
                "Refusing to reschedule exhausted queue item"
            );
            return Ok(RescheduleOutcome::LimitReached(item.clone()));
        }

        item.status = QueueStatus::Queued;
        item.scheduled_at = Some(truncate_to_millis(scheduled_at));
        Ok(RescheduleOutcome::Rescheduled(item.clone()))
    }

    async fn find_queue_items_by_document(&self, document_id: i64) -> StoreResult<Vec<QueueItem>> {
        let tables = self.tables.lock().await;
        let mut items: Vec<QueueItem> = tables
            .queue_items
            .values()
            .filter(|item| item.document_id == document_id)
            .cloned()
            .collect();
        items.sort_by(newest_first);
        Ok(items)
    }

    async fn find_all_queue_items(&self) -> StoreResult<Vec<QueueItem>> {
        let tables = self.tables.lock().await;
        let mut items: Vec<QueueItem> = tables.queue_items.values().cloned().collect();
        items.sort_by(newest_first);
        Ok(items)
    }

    async fn recover_stale_claims(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let cutoff = truncate_to_millis(cutoff);
        let now = current_timestamp();
        let mut tables = self.tables.lock().await;

        let mut recovered = 0;
        for item in tables.queue_items.values_mut() {
            let stale = item.status == QueueStatus::Processing
                && item.claimed_at.map_or(false, |claimed_at| claimed_at < cutoff);
            if stale {
                item.status = if item.has_attempts_left() {
                    QueueStatus::Queued
                } else {
                    QueueStatus::Failed
                };
                release_claim(item);
                item.updated_at = now;
                recovered += 1;
            }
        }
        Ok(recovered)
    }

    async fn purge_done_queue_items(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let cutoff = truncate_to_millis(cutoff);
        let mut tables = self.tables.lock().await;
        let before = tables.queue_items.len();
        tables
            .queue_items
            .retain(|_, item| !(item.status == QueueStatus::Done && item.updated_at < cutoff));
        Ok((before - tables.queue_items.len()) as u64)
    }

    async fn clear_queue(&self) -> StoreResult<u64> {
        let mut tables = self.tables.lock().await;
        let removed = tables.queue_items.len() as u64;
        tables.queue_items.clear();
        Ok(removed)
    }

    async fn queue_stats(&self, now: DateTime<Utc>) -> StoreResult<QueueStats> {
        let now = truncate_to_millis(now);
        let tables = self.tables.lock().await;

        let mut stats = QueueStats::default();
        for item in tables.queue_items.values() {
            match item.status {
                // Exhausted items can never be claimed again
                QueueStatus::Queued if !item.has_attempts_left() => stats.failed_count += 1,
                QueueStatus::Queued if item.scheduled_at.map_or(true, |at| at <= now) => stats.ready_count += 1,
                QueueStatus::Queued => stats.scheduled_count += 1,
                QueueStatus::Processing => stats.processing_count += 1,
                QueueStatus::Done => stats.done_count += 1,
                QueueStatus::Failed => stats.failed_count += 1,
            }
        }
        Ok(stats)
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn migrate(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn shutdown(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TaskType, DEFAULT_PRIORITY};

    fn new_document(user_id: &str, hash: &str) -> NewDocument {
        NewDocument::new(format!("documents/{}.txt", hash), format!("{}.txt", hash), hash, 10, user_id)
    }

    #[tokio::test]
    async fn test_ids_are_monotonic_and_not_reused() {
        let store = MemoryStore::new();
        let first = store.create_document(new_document("u1", "a")).await.unwrap();
        assert!(store.delete_document(first.id).await.unwrap());
        let second = store.create_document(new_document("u1", "b")).await.unwrap();

        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
    }

    #[tokio::test]
    async fn test_reset_clears_records_and_counters() {
        let store = MemoryStore::new();
        store.create_document(new_document("u1", "a")).await.unwrap();
        store.reset().await;

        assert!(store.find_document(1).await.unwrap().is_none());
        let document = store.create_document(new_document("u1", "a")).await.unwrap();
        assert_eq!(document.id, 1);
    }

    #[tokio::test]
    async fn test_shared_instance_is_the_same_store() {
        let a = MemoryStore::shared();
        let b = MemoryStore::shared();
        assert!(Arc::ptr_eq(&a.tables, &b.tables));
    }

    #[tokio::test]
    async fn test_failed_update_leaves_record_untouched() {
        let store = MemoryStore::new();
        store.create_document(new_document("u1", "a")).await.unwrap();
        let second = store.create_document(new_document("u1", "b")).await.unwrap();

        let update = DocumentUpdate {
            file_hash: Some("a".to_string()),
            original_filename: Some("renamed.txt".to_string()),
            ..Default::default()
        };
        let error = store.update_document(second.id, update).await.unwrap_err();
        assert!(error.is_constraint_violation());

        let unchanged = store.find_document(second.id).await.unwrap().unwrap();
        assert_eq!(unchanged, second);
    }

    #[tokio::test]
    async fn test_claim_respects_attempt_cap() {
        let store = MemoryStore::new();
        let document = store.create_document(new_document("u1", "a")).await.unwrap();
        let item = store
            .create_queue_item(NewQueueItem {
                document_id: document.id,
                task_type: TaskType::ExtractText,
                priority: DEFAULT_PRIORITY,
                max_attempts: 1,
                scheduled_at: None,
            })
            .await
            .unwrap();

        store.record_queue_error(item.id, "boom").await.unwrap();
        assert!(store.claim_next_queue_item(Utc::now(), "w").await.unwrap().is_none());

        let outcome = store.reschedule_queue_item(item.id, Utc::now()).await.unwrap();
        match outcome {
            RescheduleOutcome::LimitReached(item) => assert_eq!(item.status, QueueStatus::Failed),
            other => panic!("expected LimitReached, got {:?}", other),
        }
    }
}
