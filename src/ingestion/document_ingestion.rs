/*!
 * Document ingestion
 *
 * The upload path: hash the bytes, deduplicate per owner, store the bytes,
 * create the Document and enqueue text extraction. Concurrent uploads of the
 * same content by the same owner settle on the store's unique (owner, hash)
 * constraint.
 */

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::db::Store;
use crate::errors::IngestionError;
use crate::models::{Document, NewDocument, QueueItem, TaskType};
use crate::queue::{EnqueueOptions, TaskQueue};
use crate::storage::{DeleteOptions, StorageService, UploadOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeduplicationPolicy {
    /// Return the owner's existing document with the same content (direct uploads)
    ReturnExisting,
    /// Report the duplicate without returning it (batch imports)
    Skip,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IngestionResult {
    /// New document stored and queued for extraction
    Created { document: Document, queue_item: QueueItem },
    /// The owner already had this content
    ExistingDocument(Document),
    Skipped { existing_document_id: i64, reason: String },
}

impl IngestionResult {
    pub fn document_id(&self) -> i64 {
        match self {
            IngestionResult::Created { document, .. } => document.id,
            IngestionResult::ExistingDocument(document) => document.id,
            IngestionResult::Skipped { existing_document_id, .. } => *existing_document_id,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DocumentIngestionRequest {
    pub original_filename: String,
    pub file_data: Vec<u8>,
    pub mime_type: Option<String>,
    pub user_id: String,
    pub is_reference: bool,
    pub metadata: Value,
    pub deduplication_policy: DeduplicationPolicy,
}

impl DocumentIngestionRequest {
    pub fn upload(original_filename: impl Into<String>, file_data: Vec<u8>, user_id: impl Into<String>) -> Self {
        Self {
            original_filename: original_filename.into(),
            file_data,
            mime_type: None,
            user_id: user_id.into(),
            is_reference: false,
            metadata: Value::Object(Default::default()),
            deduplication_policy: DeduplicationPolicy::ReturnExisting,
        }
    }
}

#[derive(Clone)]
pub struct DocumentIngestionService {
    store: Store,
    storage: StorageService,
    queue: TaskQueue,
    max_file_size: Option<u64>,
}

impl DocumentIngestionService {
    pub fn new(store: Store, storage: StorageService, queue: TaskQueue) -> Self {
        Self {
            store,
            storage,
            queue,
            max_file_size: None,
        }
    }

    pub fn with_max_file_size(mut self, max_file_size: u64) -> Self {
        self.max_file_size = Some(max_file_size);
        self
    }

    pub async fn ingest(&self, request: DocumentIngestionRequest) -> Result<IngestionResult, IngestionError> {
        let file_size = request.file_data.len() as u64;
        if file_size == 0 {
            return Err(IngestionError::EmptyFile {
                filename: request.original_filename,
            });
        }
        if let Some(max_size) = self.max_file_size {
            if file_size > max_size {
                return Err(IngestionError::FileTooLarge {
                    size: file_size,
                    max_size,
                });
            }
        }

        let file_hash = calculate_file_hash(&request.file_data);
        debug!(
            "Ingesting {} for user {} (hash: {}, size: {} bytes, policy: {:?})",
            request.original_filename,
            request.user_id,
            &file_hash[..8],
            file_size,
            request.deduplication_policy
        );

        if let Some(existing) = self.store.find_document_by_hash(&request.user_id, &file_hash).await? {
            info!(
                "Found existing document with same content: {} (ID: {}) matches new file: {}",
                existing.original_filename, existing.id, request.original_filename
            );
            return Ok(duplicate_result(existing, request.deduplication_policy));
        }

        let storage_key = storage_key_for(&request.original_filename);
        let upload_options = UploadOptions {
            content_type: request.mime_type.clone().or_else(|| {
                mime_guess::from_path(&request.original_filename)
                    .first()
                    .map(|mime| mime.to_string())
            }),
            if_not_exists: true,
        };
        let uploaded = self
            .storage
            .upload(&storage_key, &request.file_data, &upload_options)
            .await?;

        let mut new_document = NewDocument::new(
            storage_key.clone(),
            request.original_filename.clone(),
            file_hash.clone(),
            file_size as i64,
            request.user_id.clone(),
        );
        new_document.storage_url = Some(uploaded.url);
        new_document.is_reference = request.is_reference;
        new_document.metadata = request.metadata;

        let document = match self.store.create_document(new_document).await {
            Ok(document) => document,
            Err(e) => {
                self.discard_blob(&storage_key).await;

                if !e.is_constraint_violation() {
                    warn!("Failed to create document record for {}: {}", request.original_filename, e);
                    return Err(e.into());
                }

                // Another upload of the same content won the race
                warn!(
                    "Hash collision during concurrent upload of {} (hash: {}), using existing document",
                    request.original_filename,
                    &file_hash[..8]
                );
                return match self.store.find_document_by_hash(&request.user_id, &file_hash).await? {
                    Some(existing) => Ok(duplicate_result(existing, request.deduplication_policy)),
                    None => Err(e.into()),
                };
            }
        };

        let options = EnqueueOptions::default().with_priority(calculate_priority(file_size));
        let queue_item = match self.queue.enqueue(document.id, TaskType::ExtractText, options).await {
            Ok(item) => item,
            Err(e) => {
                error!(
                    "Document {} was stored but could not be queued for extraction: {}",
                    document.id, e
                );
                // Undo the upload so a retry is not mistaken for a duplicate
                if let Err(delete_error) = self.store.delete_document(document.id).await {
                    warn!("Failed to remove unqueued document {}: {}", document.id, delete_error);
                }
                self.discard_blob(&storage_key).await;
                return Err(e.into());
            }
        };

        info!(
            "Ingested document {} (ID: {}) for user {}",
            document.original_filename, document.id, document.user_id
        );
        Ok(IngestionResult::Created { document, queue_item })
    }

    /// Remove bytes uploaded for a document that was never created or never queued
    async fn discard_blob(&self, key: &str) {
        if let Err(e) = self.storage.delete(key, &DeleteOptions { missing_ok: true }).await {
            warn!("Failed to remove orphaned upload {}: {}", key, e);
        }
    }
}

fn duplicate_result(existing: Document, policy: DeduplicationPolicy) -> IngestionResult {
    match policy {
        DeduplicationPolicy::ReturnExisting => IngestionResult::ExistingDocument(existing),
        DeduplicationPolicy::Skip => IngestionResult::Skipped {
            existing_document_id: existing.id,
            reason: format!("Content already exists as '{}'", existing.original_filename),
        },
    }
}

/// SHA-256 of the content as lowercase hex
pub fn calculate_file_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// `documents/<uuid>.<ext>`, keeping the original extension when it is a
/// plain alphanumeric one
pub fn storage_key_for(original_filename: &str) -> String {
    let extension = Path::new(original_filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.len() <= 16 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| ext.to_lowercase());

    match extension {
        Some(ext) => format!("documents/{}.{}", Uuid::new_v4(), ext),
        None => format!("documents/{}", Uuid::new_v4()),
    }
}

/// Smaller files are extracted first
pub fn calculate_priority(file_size: u64) -> i32 {
    const MB: u64 = 1024 * 1024;

    match file_size {
        0..=MB => 3,
        ..=5_242_880 => 4,
        ..=10_485_760 => 5,
        ..=52_428_800 => 6,
        _ => 7,
    }
}
