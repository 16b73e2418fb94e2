use anyhow::Result;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};
use walkdir::WalkDir;

use super::document_ingestion::{
    DeduplicationPolicy, DocumentIngestionRequest, DocumentIngestionService, IngestionResult,
};

/// Totals for one directory import
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub discovered: usize,
    pub created: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Imports every file under a directory for one owner. Duplicates of content
/// the owner already has are skipped rather than returned.
pub struct BatchIngester {
    service: DocumentIngestionService,
    batch_size: usize,
    max_concurrent_io: usize,
}

impl BatchIngester {
    pub fn new(service: DocumentIngestionService) -> Self {
        Self {
            service,
            batch_size: 1000,
            max_concurrent_io: 50,
        }
    }

    pub fn with_max_concurrent_io(mut self, max_concurrent_io: usize) -> Self {
        self.max_concurrent_io = max_concurrent_io.max(1);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Ingest all regular files below `dir_path`, recursively
    pub async fn ingest_directory(&self, dir_path: &Path, user_id: &str) -> Result<BatchSummary> {
        info!("Starting batch ingestion from directory: {:?}", dir_path);

        if !dir_path.is_dir() {
            anyhow::bail!("{} is not a directory", dir_path.display());
        }

        let file_paths = collect_files(dir_path);
        let mut summary = BatchSummary {
            discovered: file_paths.len(),
            ..Default::default()
        };
        info!("Found {} files to ingest", file_paths.len());

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_io));

        for (batch_index, chunk) in file_paths.chunks(self.batch_size).enumerate() {
            let mut handles = Vec::with_capacity(chunk.len());

            for path in chunk {
                let semaphore = Arc::clone(&semaphore);
                let service = self.service.clone();
                let path = path.clone();
                let user_id = user_id.to_string();

                handles.push(tokio::spawn(async move {
                    let _permit = semaphore.acquire_owned().await?;
                    ingest_file(&service, &path, &user_id).await
                }));
            }

            for handle in handles {
                match handle.await {
                    Ok(Ok(IngestionResult::Created { .. })) => summary.created += 1,
                    Ok(Ok(_)) => summary.skipped += 1,
                    Ok(Err(e)) => {
                        error!("Error processing file: {:#}", e);
                        summary.failed += 1;
                    }
                    Err(e) => {
                        error!("Task join error: {}", e);
                        summary.failed += 1;
                    }
                }
            }

            let done = (batch_index * self.batch_size + chunk.len()).min(file_paths.len());
            info!("Progress: {}/{} files processed", done, file_paths.len());
        }

        info!(
            "Batch ingestion completed: {} created, {} skipped, {} failed",
            summary.created, summary.skipped, summary.failed
        );
        Ok(summary)
    }
}

fn collect_files(dir_path: &Path) -> Vec<PathBuf> {
    let mut file_paths: Vec<PathBuf> = WalkDir::new(dir_path)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Skipping unreadable entry: {}", e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| !entry.file_name().to_string_lossy().starts_with('.'))
        .map(|entry| entry.into_path())
        .collect();

    file_paths.sort();
    file_paths
}

async fn ingest_file(service: &DocumentIngestionService, path: &Path, user_id: &str) -> Result<IngestionResult> {
    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("file name of {} is not valid UTF-8", path.display()))?;

    let file_data = fs::read(path).await?;

    let mut request = DocumentIngestionRequest::upload(filename, file_data, user_id);
    request.deduplication_policy = DeduplicationPolicy::Skip;
    request.metadata = json!({ "source_path": path.to_string_lossy() });

    let result = service.ingest(request).await?;
    if let IngestionResult::Skipped { reason, .. } = &result {
        info!("Skipped {}: {}", path.display(), reason);
    }
    Ok(result)
}
