#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use chrono::{DateTime, Utc};
use docflow::db::{
    ComparisonRepository, DocumentRepository, EntityStore, MemoryStore, QueueRepository, SqliteStore, Store,
    StoreResult,
};
use docflow::errors::{StorageError, StoreError};
use docflow::models::{
    Comparison, ComparisonSort, ComparisonUpdate, Document, DocumentSort, DocumentUpdate, FindOptions,
    NewComparison, NewDocument, NewQueueItem, QueueItem, QueueStats, QueueStatus, RescheduleOutcome,
};
use docflow::storage::local::LocalStorageBackend;
use docflow::storage::{
    CopyOptions, DeleteOptions, ListOptions, ObjectInfo, RetryPolicy, SignedUrlOperation, SignedUrlOptions,
    StorageBackend, StorageService, UploadOptions, UploadResult,
};

pub type StorageResult<T> = Result<T, StorageError>;

/// A store plus whatever has to outlive it
pub struct TestStore {
    pub name: &'static str,
    pub store: Store,
    _dir: Option<TempDir>,
}

pub fn memory_store() -> TestStore {
    TestStore {
        name: "memory",
        store: Arc::new(MemoryStore::new()),
        _dir: None,
    }
}

pub async fn sqlite_store() -> TestStore {
    let dir = TempDir::new().expect("temp dir");
    let database_url = format!("sqlite://{}", dir.path().join("docflow-test.db").display());
    let store = SqliteStore::connect(&database_url).await.expect("connect sqlite");
    store.migrate().await.expect("migrate sqlite");

    TestStore {
        name: "sqlite",
        store: Arc::new(store),
        _dir: Some(dir),
    }
}

/// Both backends, for scenarios that must behave identically on each
pub async fn all_stores() -> Vec<TestStore> {
    vec![memory_store(), sqlite_store().await]
}

pub fn fast_retry_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(100),
        operation_timeout: None,
    }
}

pub async fn local_storage() -> (StorageService, TempDir) {
    let dir = TempDir::new().expect("temp dir");
    let backend = LocalStorageBackend::new(dir.path(), "http://localhost:8000/files", "test-secret");
    let service = StorageService::new(Arc::new(backend), fast_retry_policy());
    service.initialize().await.expect("initialize local storage");
    (service, dir)
}

pub async fn create_document(store: &Store, user_id: &str, original_filename: &str, file_hash: &str) -> Document {
    store
        .create_document(NewDocument::new(
            format!("documents/{}", original_filename),
            original_filename,
            file_hash,
            1024,
            user_id,
        ))
        .await
        .expect("create document")
}

/// Storage backend whose `download` fails a set number of times before
/// succeeding. Every other operation succeeds immediately.
pub struct FlakyBackend {
    failures_left: AtomicU32,
    make_error: fn() -> StorageError,
    call_delay: Duration,
    pub calls: AtomicU32,
}

impl FlakyBackend {
    pub fn new(failures: u32, make_error: fn() -> StorageError) -> Self {
        Self {
            failures_left: AtomicU32::new(failures),
            make_error,
            call_delay: Duration::ZERO,
            calls: AtomicU32::new(0),
        }
    }

    pub fn always_failing(make_error: fn() -> StorageError) -> Self {
        Self::new(u32::MAX, make_error)
    }

    pub fn with_call_delay(mut self, call_delay: Duration) -> Self {
        self.call_delay = call_delay;
        self
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

pub fn connection_error() -> StorageError {
    StorageError::ConnectionFailed {
        details: "connection reset by peer".to_string(),
    }
}

pub fn access_denied() -> StorageError {
    StorageError::AccessDenied {
        key: "documents/a.txt".to_string(),
        details: "403".to_string(),
    }
}

#[async_trait]
impl StorageBackend for FlakyBackend {
    fn backend_name(&self) -> &'static str {
        "flaky"
    }

    async fn initialize(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn upload(&self, key: &str, data: &[u8], _options: &UploadOptions) -> StorageResult<UploadResult> {
        Ok(UploadResult {
            key: key.to_string(),
            url: format!("flaky://{}", key),
            size: data.len() as u64,
            etag: None,
        })
    }

    async fn download(&self, _key: &str) -> StorageResult<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.call_delay.is_zero() {
            tokio::time::sleep(self.call_delay).await;
        }

        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            if left != u32::MAX {
                self.failures_left.store(left - 1, Ordering::SeqCst);
            }
            return Err((self.make_error)());
        }
        Ok(b"hello".to_vec())
    }

    async fn delete(&self, _key: &str, _options: &DeleteOptions) -> StorageResult<()> {
        Ok(())
    }

    async fn list(&self, _options: &ListOptions) -> StorageResult<Vec<ObjectInfo>> {
        Ok(Vec::new())
    }

    async fn exists(&self, _key: &str) -> StorageResult<bool> {
        Ok(true)
    }

    async fn head(&self, key: &str) -> StorageResult<ObjectInfo> {
        Ok(ObjectInfo {
            key: key.to_string(),
            size: 5,
            content_type: None,
            last_modified: None,
            etag: None,
        })
    }

    async fn copy(&self, _source_key: &str, dest_key: &str, _options: &CopyOptions) -> StorageResult<ObjectInfo> {
        self.head(dest_key).await
    }

    async fn signed_url(
        &self,
        key: &str,
        _operation: SignedUrlOperation,
        _options: &SignedUrlOptions,
    ) -> StorageResult<String> {
        Ok(format!("flaky://{}?signed", key))
    }
}

/// Memory store whose queue refuses new items, for exercising enqueue failures
pub struct QueueUnavailableStore {
    inner: MemoryStore,
}

impl QueueUnavailableStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
        }
    }
}

#[async_trait]
impl DocumentRepository for QueueUnavailableStore {
    async fn create_document(&self, new: NewDocument) -> StoreResult<Document> {
        self.inner.create_document(new).await
    }

    async fn find_document(&self, id: i64) -> StoreResult<Option<Document>> {
        self.inner.find_document(id).await
    }

    async fn find_document_by_hash(&self, user_id: &str, file_hash: &str) -> StoreResult<Option<Document>> {
        self.inner.find_document_by_hash(user_id, file_hash).await
    }

    async fn find_documents_by_user(
        &self,
        user_id: &str,
        options: FindOptions<DocumentSort>,
    ) -> StoreResult<Vec<Document>> {
        self.inner.find_documents_by_user(user_id, options).await
    }

    async fn update_document(&self, id: i64, update: DocumentUpdate) -> StoreResult<bool> {
        self.inner.update_document(id, update).await
    }

    async fn delete_document(&self, id: i64) -> StoreResult<bool> {
        self.inner.delete_document(id).await
    }
}

#[async_trait]
impl ComparisonRepository for QueueUnavailableStore {
    async fn create_comparison(&self, new: NewComparison) -> StoreResult<Comparison> {
        self.inner.create_comparison(new).await
    }

    async fn find_comparison(&self, id: i64) -> StoreResult<Option<Comparison>> {
        self.inner.find_comparison(id).await
    }

    async fn find_comparisons_by_user(
        &self,
        user_id: &str,
        options: FindOptions<ComparisonSort>,
    ) -> StoreResult<Vec<Comparison>> {
        self.inner.find_comparisons_by_user(user_id, options).await
    }

    async fn update_comparison(&self, id: i64, update: ComparisonUpdate) -> StoreResult<bool> {
        self.inner.update_comparison(id, update).await
    }

    async fn delete_comparison(&self, id: i64) -> StoreResult<bool> {
        self.inner.delete_comparison(id).await
    }
}

#[async_trait]
impl QueueRepository for QueueUnavailableStore {
    async fn create_queue_item(&self, _new: NewQueueItem) -> StoreResult<QueueItem> {
        Err(StoreError::Connection {
            operation: "create",
            entity: "queue_item",
            details: "queue table is locked".to_string(),
        })
    }

    async fn find_queue_item(&self, id: i64) -> StoreResult<Option<QueueItem>> {
        self.inner.find_queue_item(id).await
    }

    async fn claim_next_queue_item(&self, now: DateTime<Utc>, worker_id: &str) -> StoreResult<Option<QueueItem>> {
        self.inner.claim_next_queue_item(now, worker_id).await
    }

    async fn set_queue_status(&self, id: i64, status: QueueStatus) -> StoreResult<bool> {
        self.inner.set_queue_status(id, status).await
    }

    async fn record_queue_error(&self, id: i64, message: &str) -> StoreResult<Option<QueueItem>> {
        self.inner.record_queue_error(id, message).await
    }

    async fn reschedule_queue_item(&self, id: i64, scheduled_at: DateTime<Utc>) -> StoreResult<RescheduleOutcome> {
        self.inner.reschedule_queue_item(id, scheduled_at).await
    }

    async fn find_queue_items_by_document(&self, document_id: i64) -> StoreResult<Vec<QueueItem>> {
        self.inner.find_queue_items_by_document(document_id).await
    }

    async fn find_all_queue_items(&self) -> StoreResult<Vec<QueueItem>> {
        self.inner.find_all_queue_items().await
    }

    async fn recover_stale_claims(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        self.inner.recover_stale_claims(cutoff).await
    }

    async fn purge_done_queue_items(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        self.inner.purge_done_queue_items(cutoff).await
    }

    async fn clear_queue(&self) -> StoreResult<u64> {
        self.inner.clear_queue().await
    }

    async fn queue_stats(&self, now: DateTime<Utc>) -> StoreResult<QueueStats> {
        self.inner.queue_stats(now).await
    }
}

#[async_trait]
impl EntityStore for QueueUnavailableStore {
    fn backend_name(&self) -> &'static str {
        "queue-unavailable"
    }

    async fn migrate(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn shutdown(&self) {}
}
