/*!
 * File storage
 *
 * `StorageBackend` is the seam between the application and where file bytes
 * live: the local filesystem or an S3-compatible object store. Callers never
 * use a backend directly; they go through `StorageService`, which checks the
 * lifecycle and retries transient failures with exponential backoff.
 */

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use crate::config::{Config, StorageBackendKind};
use crate::errors::StorageError;

pub mod local;
pub mod retry;
#[cfg(feature = "s3")]
pub mod s3;

pub use local::LocalStorageBackend;
pub use retry::{with_retry, RetryPolicy};
#[cfg(feature = "s3")]
pub use s3::S3StorageBackend;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadOptions {
    pub content_type: Option<String>,
    /// Fail with `AlreadyExists` instead of replacing an existing object
    pub if_not_exists: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteOptions {
    /// Treat a missing object as already deleted
    pub missing_ok: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    pub prefix: Option<String>,
    pub max_keys: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CopyOptions {
    pub if_not_exists: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignedUrlOperation {
    Get,
    Put,
}

impl SignedUrlOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignedUrlOperation::Get => "get",
            SignedUrlOperation::Put => "put",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedUrlOptions {
    pub expires_in: Duration,
}

impl Default for SignedUrlOptions {
    fn default() -> Self {
        Self {
            expires_in: Duration::from_secs(60 * 60),
        }
    }
}

/// Metadata of one stored object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    pub content_type: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    pub etag: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResult {
    pub key: String,
    /// Where the object can be fetched from, recorded as the document's storage URL
    pub url: String,
    pub size: u64,
    pub etag: Option<String>,
}

#[async_trait]
pub trait StorageBackend: Send + Sync {
    fn backend_name(&self) -> &'static str;

    /// Prepare the backend and prove it is reachable
    async fn initialize(&self) -> StorageResult<()>;

    async fn upload(&self, key: &str, data: &[u8], options: &UploadOptions) -> StorageResult<UploadResult>;

    async fn download(&self, key: &str) -> StorageResult<Vec<u8>>;

    async fn delete(&self, key: &str, options: &DeleteOptions) -> StorageResult<()>;

    /// Objects in key order
    async fn list(&self, options: &ListOptions) -> StorageResult<Vec<ObjectInfo>>;

    async fn exists(&self, key: &str) -> StorageResult<bool>;

    async fn head(&self, key: &str) -> StorageResult<ObjectInfo>;

    async fn copy(&self, source_key: &str, dest_key: &str, options: &CopyOptions) -> StorageResult<ObjectInfo>;

    /// Pure computation; makes no request to the backend
    async fn signed_url(
        &self,
        key: &str,
        operation: SignedUrlOperation,
        options: &SignedUrlOptions,
    ) -> StorageResult<String>;
}

/// Retrying facade over a storage backend.
///
/// Clones share the backend and the initialized flag.
#[derive(Clone)]
pub struct StorageService {
    backend: Arc<dyn StorageBackend>,
    policy: RetryPolicy,
    initialized: Arc<AtomicBool>,
}

impl StorageService {
    pub fn new(backend: Arc<dyn StorageBackend>, policy: RetryPolicy) -> Self {
        Self {
            backend,
            policy,
            initialized: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.backend_name()
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// A handle whose calls each give up after `timeout`, retries included
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let mut scoped = self.clone();
        scoped.policy.operation_timeout = Some(timeout);
        scoped
    }

    pub async fn initialize(&self) -> StorageResult<()> {
        if self.is_initialized() {
            return Ok(());
        }

        with_retry(&self.policy, "initialize", || self.backend.initialize()).await?;
        self.initialized.store(true, Ordering::Release);
        info!("Storage service initialized with {} backend", self.backend.backend_name());
        Ok(())
    }

    /// Every call after this fails with `NotInitialized` until the next
    /// `initialize`
    pub fn shutdown(&self) {
        if self.initialized.swap(false, Ordering::AcqRel) {
            info!("Storage service shut down");
        }
    }

    fn ensure_initialized(&self, operation: &'static str) -> StorageResult<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            error!(operation, "Storage service used before initialize()");
            Err(StorageError::NotInitialized)
        }
    }

    pub async fn upload(&self, key: &str, data: &[u8], options: &UploadOptions) -> StorageResult<UploadResult> {
        self.ensure_initialized("upload")?;
        with_retry(&self.policy, "upload", || self.backend.upload(key, data, options)).await
    }

    pub async fn download(&self, key: &str) -> StorageResult<Vec<u8>> {
        self.ensure_initialized("download")?;
        with_retry(&self.policy, "download", || self.backend.download(key)).await
    }

    pub async fn delete(&self, key: &str, options: &DeleteOptions) -> StorageResult<()> {
        self.ensure_initialized("delete")?;
        with_retry(&self.policy, "delete", || self.backend.delete(key, options)).await
    }

    pub async fn list(&self, options: &ListOptions) -> StorageResult<Vec<ObjectInfo>> {
        self.ensure_initialized("list")?;
        with_retry(&self.policy, "list", || self.backend.list(options)).await
    }

    pub async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.ensure_initialized("exists")?;
        with_retry(&self.policy, "exists", || self.backend.exists(key)).await
    }

    pub async fn head(&self, key: &str) -> StorageResult<ObjectInfo> {
        self.ensure_initialized("head")?;
        with_retry(&self.policy, "head", || self.backend.head(key)).await
    }

    pub async fn copy(&self, source_key: &str, dest_key: &str, options: &CopyOptions) -> StorageResult<ObjectInfo> {
        self.ensure_initialized("copy")?;
        with_retry(&self.policy, "copy", || self.backend.copy(source_key, dest_key, options)).await
    }

    /// Not retried
    pub async fn signed_url(
        &self,
        key: &str,
        operation: SignedUrlOperation,
        options: &SignedUrlOptions,
    ) -> StorageResult<String> {
        self.ensure_initialized("signed_url")?;
        self.backend.signed_url(key, operation, options).await
    }
}

/// Build and initialize the storage backend chosen by configuration
pub async fn open_storage(config: &Config) -> anyhow::Result<StorageService> {
    let backend: Arc<dyn StorageBackend> = match config.storage_backend {
        StorageBackendKind::Local => Arc::new(LocalStorageBackend::new(
            &config.upload_path,
            &config.public_base_url,
            &config.signing_secret,
        )),
        #[cfg(feature = "s3")]
        StorageBackendKind::S3 => Arc::new(S3StorageBackend::new(&config.s3).await?),
        #[cfg(not(feature = "s3"))]
        StorageBackendKind::S3 => {
            return Err(anyhow::anyhow!(
                "S3 support not compiled in. Enable the 's3' feature to use STORAGE_BACKEND=s3."
            ))
        }
    };

    let service = StorageService::new(backend, RetryPolicy::from_config(config));
    service.initialize().await?;
    Ok(service)
}
