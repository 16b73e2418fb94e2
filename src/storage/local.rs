use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use super::{
    CopyOptions, DeleteOptions, ListOptions, ObjectInfo, SignedUrlOperation, SignedUrlOptions, StorageBackend,
    StorageResult, UploadOptions, UploadResult,
};
use crate::errors::StorageError;

const MAX_KEY_LENGTH: usize = 1024;
const TEMP_SUFFIX: &str = ".partial";
const HEALTH_CHECK_KEY: &str = ".health-check";

/// Stores objects as files under a root directory. Keys are relative,
/// `/`-separated paths.
pub struct LocalStorageBackend {
    root: PathBuf,
    public_base_url: String,
    signing_secret: String,
}

impl LocalStorageBackend {
    pub fn new(root: impl Into<PathBuf>, public_base_url: &str, signing_secret: &str) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
            signing_secret: signing_secret.to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> StorageResult<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    pub fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_base_url, encode_key(key))
    }

    fn signature(&self, key: &str, operation: SignedUrlOperation, expires: i64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.signing_secret.as_bytes());
        hasher.update(b"\n");
        hasher.update(operation.as_str().as_bytes());
        hasher.update(b"\n");
        hasher.update(key.as_bytes());
        hasher.update(b"\n");
        hasher.update(expires.to_string().as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Check a signature produced by `signed_url`. Expired or tampered URLs
    /// are rejected.
    pub fn verify_signature(&self, key: &str, operation: SignedUrlOperation, expires: i64, signature: &str) -> bool {
        if expires <= Utc::now().timestamp() {
            return false;
        }
        let expected = self.signature(key, operation, expires);
        expected.len() == signature.len()
            && expected
                .bytes()
                .zip(signature.bytes())
                .fold(0u8, |acc, (a, b)| acc | (a ^ b))
                == 0
    }

    /// Write through a temporary sibling and rename it into place, so readers
    /// never see a half-written object
    /// Write through a temp file in the target directory. With `overwrite`
    /// off the temp file is hard-linked into place, which fails if the key
    /// already exists, so two concurrent creators cannot both win.
    async fn write_atomic(&self, key: &str, path: &Path, data: &[u8], overwrite: bool) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::from_io(e, key))?;
        }

        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp_path = path.with_file_name(format!("{}.{}{}", file_name, Uuid::new_v4(), TEMP_SUFFIX));

        let written: std::io::Result<()> = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(data).await?;
            file.sync_all().await?;
            drop(file);
            if overwrite {
                fs::rename(&temp_path, path).await
            } else {
                fs::hard_link(&temp_path, path).await?;
                let _ = fs::remove_file(&temp_path).await;
                Ok(())
            }
        }
        .await;

        if let Err(e) = written {
            if e.kind() != std::io::ErrorKind::AlreadyExists {
                warn!(key, temp_path = %temp_path.display(), error = %e, "local storage: atomic write failed");
            }
            let _ = fs::remove_file(&temp_path).await;
            return Err(StorageError::from_io(e, key));
        }
        Ok(())
    }

    async fn object_info(&self, key: &str, path: &Path) -> StorageResult<ObjectInfo> {
        let metadata = fs::metadata(path).await.map_err(|e| StorageError::from_io(e, key))?;
        if !metadata.is_file() {
            return Err(StorageError::NotFound { key: key.to_string() });
        }
        Ok(build_object_info(key, path, &metadata))
    }
}

/// Keys are relative paths without `.`/`..` segments, empty segments or
/// backslashes, so they can never escape the root directory
pub fn validate_key(key: &str) -> StorageResult<()> {
    let invalid = |reason: &str| {
        Err(StorageError::InvalidKey {
            key: key.to_string(),
            reason: reason.to_string(),
        })
    };

    if key.is_empty() {
        return invalid("key is empty");
    }
    if key.len() > MAX_KEY_LENGTH {
        return invalid("key is longer than 1024 bytes");
    }
    if key.starts_with('/') {
        return invalid("key must be relative");
    }
    if key.contains('\\') || key.contains('\0') {
        return invalid("key contains a forbidden character");
    }
    if key.ends_with(TEMP_SUFFIX) {
        return invalid("key uses a reserved suffix");
    }
    if key.split('/').any(|segment| segment.is_empty() || segment == "." || segment == "..") {
        return invalid("key contains an empty, '.' or '..' segment");
    }
    Ok(())
}

fn encode_key(key: &str) -> String {
    key.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn to_utc(time: SystemTime) -> Option<DateTime<Utc>> {
    let duration = time.duration_since(UNIX_EPOCH).ok()?;
    DateTime::from_timestamp(duration.as_secs() as i64, duration.subsec_nanos())
}

/// Weak ETag from size and modification time
fn generate_etag(key: &str, metadata: &std::fs::Metadata) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    if let Ok(modified) = metadata.modified() {
        if let Ok(duration) = modified.duration_since(UNIX_EPOCH) {
            hasher.update(duration.as_nanos().to_be_bytes());
        }
    }
    hasher.update(metadata.len().to_be_bytes());
    format!("{:x}", hasher.finalize())[..16].to_string()
}

fn build_object_info(key: &str, path: &Path, metadata: &std::fs::Metadata) -> ObjectInfo {
    ObjectInfo {
        key: key.to_string(),
        size: metadata.len(),
        content_type: mime_guess::from_path(path).first().map(|mime| mime.to_string()),
        last_modified: metadata.modified().ok().and_then(to_utc),
        etag: Some(generate_etag(key, metadata)),
    }
}

#[async_trait]
impl StorageBackend for LocalStorageBackend {
    fn backend_name(&self) -> &'static str {
        "local"
    }

    /// Create the root and round-trip a health-check file through it
    async fn initialize(&self) -> StorageResult<()> {
        fs::create_dir_all(&self.root)
            .await
            .map_err(|e| StorageError::from_io(e, ""))?;

        let probe = self.root.join(HEALTH_CHECK_KEY);
        let data = b"storage-health-check";
        fs::write(&probe, data)
            .await
            .map_err(|e| StorageError::from_io(e, HEALTH_CHECK_KEY))?;
        let read_back = fs::read(&probe)
            .await
            .map_err(|e| StorageError::from_io(e, HEALTH_CHECK_KEY))?;
        let _ = fs::remove_file(&probe).await;

        if read_back != data {
            return Err(StorageError::Configuration {
                details: format!("read-back mismatch in {}", self.root.display()),
            });
        }

        info!("Local storage ready at {}", self.root.display());
        Ok(())
    }

    async fn upload(&self, key: &str, data: &[u8], options: &UploadOptions) -> StorageResult<UploadResult> {
        let path = self.path_for(key)?;
        debug!(key, size = data.len(), "local storage: upload");

        self.write_atomic(key, &path, data, !options.if_not_exists).await?;
        let info = self.object_info(key, &path).await?;

        Ok(UploadResult {
            key: key.to_string(),
            url: self.public_url(key),
            size: info.size,
            etag: info.etag,
        })
    }

    async fn download(&self, key: &str) -> StorageResult<Vec<u8>> {
        let path = self.path_for(key)?;
        fs::read(&path).await.map_err(|e| StorageError::from_io(e, key))
    }

    async fn delete(&self, key: &str, options: &DeleteOptions) -> StorageResult<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!(key, "local storage: deleted");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && options.missing_ok => Ok(()),
            Err(e) => Err(StorageError::from_io(e, key)),
        }
    }

    async fn list(&self, options: &ListOptions) -> StorageResult<Vec<ObjectInfo>> {
        let root = self.root.clone();
        let prefix = options.prefix.clone().unwrap_or_default();
        let max_keys = options.max_keys;

        let listed = tokio::task::spawn_blocking(move || -> StorageResult<Vec<ObjectInfo>> {
            let mut objects = Vec::new();

            for entry in WalkDir::new(&root).follow_links(false) {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        let io_error = e
                            .into_io_error()
                            .unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "filesystem loop"));
                        return Err(StorageError::from_io(io_error, &prefix));
                    }
                };

                if !entry.file_type().is_file() {
                    continue;
                }

                let Ok(relative) = entry.path().strip_prefix(&root) else {
                    continue;
                };
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");

                if key.ends_with(TEMP_SUFFIX) || key == HEALTH_CHECK_KEY || !key.starts_with(&prefix) {
                    continue;
                }

                let metadata = entry
                    .metadata()
                    .map_err(|e| StorageError::Io { details: e.to_string() })?;
                objects.push(build_object_info(&key, entry.path(), &metadata));
            }

            objects.sort_by(|a, b| a.key.cmp(&b.key));
            if let Some(max_keys) = max_keys {
                objects.truncate(max_keys);
            }
            Ok(objects)
        })
        .await
        .map_err(|e| StorageError::Io {
            details: format!("listing task failed: {}", e),
        })??;

        Ok(listed)
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.path_for(key)?;
        match fs::metadata(&path).await {
            Ok(metadata) => Ok(metadata.is_file()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::from_io(e, key)),
        }
    }

    async fn head(&self, key: &str) -> StorageResult<ObjectInfo> {
        let path = self.path_for(key)?;
        self.object_info(key, &path).await
    }

    async fn copy(&self, source_key: &str, dest_key: &str, options: &CopyOptions) -> StorageResult<ObjectInfo> {
        let source = self.path_for(source_key)?;
        let dest = self.path_for(dest_key)?;

        let data = fs::read(&source)
            .await
            .map_err(|e| StorageError::from_io(e, source_key))?;
        self.write_atomic(dest_key, &dest, &data, !options.if_not_exists).await?;
        self.object_info(dest_key, &dest).await
    }

    async fn signed_url(
        &self,
        key: &str,
        operation: SignedUrlOperation,
        options: &SignedUrlOptions,
    ) -> StorageResult<String> {
        validate_key(key)?;
        let expires = Utc::now().timestamp() + options.expires_in.as_secs() as i64;
        let signature = self.signature(key, operation, expires);

        Ok(format!(
            "{}?op={}&expires={}&signature={}",
            self.public_url(key),
            operation.as_str(),
            expires,
            signature
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn backend(dir: &TempDir) -> LocalStorageBackend {
        LocalStorageBackend::new(dir.path(), "http://localhost:8000/files/", "test-secret")
    }

    #[test]
    fn test_key_validation() {
        assert!(validate_key("documents/a.txt").is_ok());
        assert!(validate_key("a b/c.txt").is_ok());

        for key in ["", "/etc/passwd", "../a.txt", "a/../../b", "a//b", "a\\b", "./a", "a/", "x.partial"] {
            assert!(
                matches!(validate_key(key), Err(StorageError::InvalidKey { .. })),
                "key {:?} should be rejected",
                key
            );
        }
    }

    #[tokio::test]
    async fn test_upload_download_head() {
        let dir = TempDir::new().unwrap();
        let storage = backend(&dir);
        storage.initialize().await.unwrap();

        let uploaded = storage
            .upload("documents/report.txt", b"quarterly numbers", &UploadOptions::default())
            .await
            .unwrap();
        assert_eq!(uploaded.size, 17);
        assert_eq!(uploaded.url, "http://localhost:8000/files/documents/report.txt");

        let bytes = storage.download("documents/report.txt").await.unwrap();
        assert_eq!(bytes, b"quarterly numbers");

        let info = storage.head("documents/report.txt").await.unwrap();
        assert_eq!(info.content_type.as_deref(), Some("text/plain"));
        assert_eq!(info.size, 17);
    }

    #[tokio::test]
    async fn test_upload_if_not_exists() {
        let dir = TempDir::new().unwrap();
        let storage = backend(&dir);
        let options = UploadOptions {
            if_not_exists: true,
            ..Default::default()
        };

        storage.upload("a.txt", b"one", &options).await.unwrap();
        let error = storage.upload("a.txt", b"two", &options).await.unwrap_err();
        assert!(matches!(error, StorageError::AlreadyExists { .. }));
        assert_eq!(storage.download("a.txt").await.unwrap(), b"one");
    }

    #[tokio::test]
    async fn test_concurrent_if_not_exists_uploads_have_one_winner() {
        let dir = TempDir::new().unwrap();
        let storage = backend(&dir);
        let options = UploadOptions {
            if_not_exists: true,
            ..Default::default()
        };

        let payloads: Vec<Vec<u8>> = (0..8).map(|n| format!("writer {}", n).into_bytes()).collect();
        let results = futures::future::join_all(
            payloads
                .iter()
                .map(|payload| storage.upload("race.txt", payload, &options)),
        )
        .await;

        let winners: Vec<usize> = results
            .iter()
            .enumerate()
            .filter(|(_, result)| result.is_ok())
            .map(|(n, _)| n)
            .collect();
        assert_eq!(winners.len(), 1, "{:?}", results);
        assert!(results
            .iter()
            .filter_map(|result| result.as_ref().err())
            .all(|error| matches!(error, StorageError::AlreadyExists { .. })));
        assert_eq!(storage.download("race.txt").await.unwrap(), payloads[winners[0]]);

        // Losers clean up their temp files
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(TEMP_SUFFIX))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_delete_missing() {
        let dir = TempDir::new().unwrap();
        let storage = backend(&dir);

        let error = storage.delete("nope.txt", &DeleteOptions::default()).await.unwrap_err();
        assert!(error.is_not_found());

        storage
            .delete("nope.txt", &DeleteOptions { missing_ok: true })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_list_with_prefix_in_key_order() {
        let dir = TempDir::new().unwrap();
        let storage = backend(&dir);
        storage.initialize().await.unwrap();

        for key in ["documents/b.txt", "documents/a.txt", "reports/c.pdf"] {
            storage.upload(key, b"x", &UploadOptions::default()).await.unwrap();
        }

        let listed = storage
            .list(&ListOptions {
                prefix: Some("documents/".to_string()),
                max_keys: None,
            })
            .await
            .unwrap();
        let keys: Vec<&str> = listed.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["documents/a.txt", "documents/b.txt"]);

        let limited = storage
            .list(&ListOptions {
                prefix: None,
                max_keys: Some(1),
            })
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_copy() {
        let dir = TempDir::new().unwrap();
        let storage = backend(&dir);
        storage.upload("a.txt", b"payload", &UploadOptions::default()).await.unwrap();

        let copied = storage.copy("a.txt", "nested/b.txt", &CopyOptions::default()).await.unwrap();
        assert_eq!(copied.key, "nested/b.txt");
        assert_eq!(storage.download("nested/b.txt").await.unwrap(), b"payload");

        let error = storage
            .copy("a.txt", "nested/b.txt", &CopyOptions { if_not_exists: true })
            .await
            .unwrap_err();
        assert!(matches!(error, StorageError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_signed_url_verifies() {
        let dir = TempDir::new().unwrap();
        let storage = backend(&dir);

        let url = storage
            .signed_url("documents/a b.txt", SignedUrlOperation::Get, &SignedUrlOptions::default())
            .await
            .unwrap();
        assert!(url.starts_with("http://localhost:8000/files/documents/a%20b.txt?op=get&expires="));

        let query: std::collections::HashMap<&str, &str> = url
            .split_once('?')
            .unwrap()
            .1
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .collect();
        let expires: i64 = query["expires"].parse().unwrap();
        let signature = query["signature"];

        assert!(storage.verify_signature("documents/a b.txt", SignedUrlOperation::Get, expires, signature));
        assert!(!storage.verify_signature("documents/a b.txt", SignedUrlOperation::Put, expires, signature));
        assert!(!storage.verify_signature("documents/other.txt", SignedUrlOperation::Get, expires, signature));
    }

    #[tokio::test]
    async fn test_expired_signature_rejected() {
        let dir = TempDir::new().unwrap();
        let storage = backend(&dir);
        let expired = Utc::now().timestamp() - 1;
        let signature = storage.signature("a.txt", SignedUrlOperation::Get, expired);

        assert!(!storage.verify_signature("a.txt", SignedUrlOperation::Get, expired, &signature));

        let options = SignedUrlOptions {
            expires_in: Duration::from_secs(60),
        };
        assert!(storage.signed_url("../a.txt", SignedUrlOperation::Get, &options).await.is_err());
    }
}
