use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use aws_types::region::Region as AwsRegion;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::{
    CopyOptions, DeleteOptions, ListOptions, ObjectInfo, SignedUrlOperation, SignedUrlOptions, StorageBackend,
    StorageResult, UploadOptions, UploadResult,
};
use crate::config::S3Settings;
use crate::errors::StorageError;

/// Objects in one bucket of an S3-compatible store
pub struct S3StorageBackend {
    client: Client,
    bucket: String,
    endpoint_url: Option<String>,
}

impl S3StorageBackend {
    pub async fn new(settings: &S3Settings) -> StorageResult<Self> {
        if settings.bucket.is_empty() {
            return Err(StorageError::Configuration {
                details: "bucket name is required".to_string(),
            });
        }

        let region = if settings.region.is_empty() {
            "us-east-1".to_string()
        } else {
            settings.region.clone()
        };

        let mut builder = match (&settings.access_key_id, &settings.secret_access_key) {
            (Some(access_key_id), Some(secret_access_key)) => {
                let credentials = Credentials::new(access_key_id, secret_access_key, None, None, "docflow-storage");
                aws_sdk_s3::config::Builder::new()
                    .region(AwsRegion::new(region))
                    .credentials_provider(credentials)
                    .behavior_version_latest()
            }
            _ => {
                let shared = aws_config::defaults(aws_config::BehaviorVersion::latest())
                    .region(AwsRegion::new(region))
                    .load()
                    .await;
                aws_sdk_s3::config::Builder::from(&shared)
            }
        };

        let endpoint_url = settings.endpoint_url.clone().filter(|url| !url.is_empty());
        if let Some(endpoint_url) = &endpoint_url {
            // S3-compatible services generally do not support virtual-hosted buckets
            builder = builder.endpoint_url(endpoint_url).force_path_style(true);
            info!("Using custom S3 endpoint: {}", endpoint_url);
        }

        Ok(Self {
            client: Client::from_conf(builder.build()),
            bucket: settings.bucket.clone(),
            endpoint_url,
        })
    }

    fn object_url(&self, key: &str) -> String {
        match &self.endpoint_url {
            Some(endpoint) => format!("{}/{}/{}", endpoint.trim_end_matches('/'), self.bucket, key),
            None => format!("s3://{}/{}", self.bucket, key),
        }
    }

    fn presigning_config(options: &SignedUrlOptions) -> StorageResult<PresigningConfig> {
        PresigningConfig::expires_in(options.expires_in).map_err(|e| StorageError::Configuration {
            details: format!("invalid signed URL expiry: {}", e),
        })
    }
}

fn require_key(key: &str) -> StorageResult<()> {
    if key.is_empty() || key.len() > 1024 {
        return Err(StorageError::InvalidKey {
            key: key.to_string(),
            reason: "object keys must be 1 to 1024 bytes".to_string(),
        });
    }
    Ok(())
}

/// Map an SDK failure onto the storage error taxonomy. Service error codes
/// win over the HTTP status when the service provides one.
fn classify<E>(error: SdkError<E, HttpResponse>, key: &str) -> StorageError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let details = DisplayErrorContext(&error).to_string();

    match &error {
        SdkError::TimeoutError(_) => StorageError::Timeout { details },
        SdkError::DispatchFailure(failure) if failure.is_timeout() => StorageError::Timeout { details },
        SdkError::DispatchFailure(_) => StorageError::ConnectionFailed { details },
        SdkError::ResponseError(response) => {
            StorageError::from_status(response.raw().status().as_u16(), key, details)
        }
        SdkError::ServiceError(service) => {
            let status = service.raw().status().as_u16();
            match service.err().code() {
                Some("NoSuchBucket") => StorageError::BucketNotFound { bucket: key.to_string() },
                Some("NoSuchKey") | Some("NotFound") => StorageError::NotFound { key: key.to_string() },
                Some("AccessDenied") | Some("Forbidden") => StorageError::AccessDenied {
                    key: key.to_string(),
                    details,
                },
                Some("SlowDown") | Some("Throttling") | Some("ThrottlingException") | Some("RequestLimitExceeded")
                | Some("TooManyRequests") => StorageError::Throttled { details },
                Some("RequestTimeout") => StorageError::Timeout { details },
                Some("ServiceUnavailable") => StorageError::ServiceUnavailable { details },
                Some("PreconditionFailed") => StorageError::AlreadyExists { key: key.to_string() },
                _ => StorageError::from_status(status, key, details),
            }
        }
        SdkError::ConstructionFailure(_) => StorageError::Configuration { details },
        _ => StorageError::Io { details },
    }
}

fn to_chrono(timestamp: &aws_sdk_s3::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(timestamp.secs(), timestamp.subsec_nanos())
}

fn trim_etag(etag: Option<&str>) -> Option<String> {
    etag.map(|etag| etag.trim_matches('"').to_string())
}

#[async_trait]
impl StorageBackend for S3StorageBackend {
    fn backend_name(&self) -> &'static str {
        "s3"
    }

    async fn initialize(&self) -> StorageResult<()> {
        match self.client.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => {
                info!("S3 bucket {} is reachable", self.bucket);
                Ok(())
            }
            Err(e) => match classify(e, &self.bucket) {
                StorageError::NotFound { .. } => Err(StorageError::BucketNotFound {
                    bucket: self.bucket.clone(),
                }),
                other => Err(other),
            },
        }
    }

    async fn upload(&self, key: &str, data: &[u8], options: &UploadOptions) -> StorageResult<UploadResult> {
        require_key(key)?;
        debug!(bucket = %self.bucket, key, size = data.len(), "s3 storage: upload");

        let content_type = options
            .content_type
            .clone()
            .or_else(|| mime_guess::from_path(key).first().map(|mime| mime.to_string()));

        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data.to_vec()))
            .set_content_type(content_type);
        if options.if_not_exists {
            request = request.if_none_match("*");
        }

        let output = request.send().await.map_err(|e| classify(e, key))?;

        Ok(UploadResult {
            key: key.to_string(),
            url: self.object_url(key),
            size: data.len() as u64,
            etag: trim_etag(output.e_tag()),
        })
    }

    async fn download(&self, key: &str) -> StorageResult<Vec<u8>> {
        require_key(key)?;
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify(e, key))?;

        let body = output.body.collect().await.map_err(|e| StorageError::ConnectionFailed {
            details: format!("failed to read object body: {}", e),
        })?;
        Ok(body.into_bytes().to_vec())
    }

    async fn delete(&self, key: &str, options: &DeleteOptions) -> StorageResult<()> {
        require_key(key)?;

        // S3 deletes are idempotent, so absence has to be checked up front
        if !options.missing_ok && !self.exists(key).await? {
            return Err(StorageError::NotFound { key: key.to_string() });
        }

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify(e, key))?;
        Ok(())
    }

    async fn list(&self, options: &ListOptions) -> StorageResult<Vec<ObjectInfo>> {
        let mut objects = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .set_prefix(options.prefix.clone())
                .set_continuation_token(continuation_token.take());
            if let Some(max_keys) = options.max_keys {
                request = request.max_keys(max_keys.saturating_sub(objects.len()).min(1000) as i32);
            }

            let response = request.send().await.map_err(|e| classify(e, &self.bucket))?;

            for object in response.contents() {
                let Some(key) = object.key() else {
                    continue;
                };
                if key.ends_with('/') {
                    continue;
                }
                objects.push(ObjectInfo {
                    key: key.to_string(),
                    size: object.size().unwrap_or(0).max(0) as u64,
                    content_type: mime_guess::from_path(key).first().map(|mime| mime.to_string()),
                    last_modified: object.last_modified().and_then(to_chrono),
                    etag: trim_etag(object.e_tag()),
                });
            }

            let limit_reached = options.max_keys.map_or(false, |max| objects.len() >= max);
            if response.is_truncated() == Some(true) && !limit_reached {
                continuation_token = response.next_continuation_token().map(str::to_string);
            } else {
                break;
            }
        }

        if let Some(max_keys) = options.max_keys {
            objects.truncate(max_keys);
        }
        Ok(objects)
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        match self.head(key).await {
            Ok(_) => Ok(true),
            Err(StorageError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn head(&self, key: &str) -> StorageResult<ObjectInfo> {
        require_key(key)?;
        let output = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify(e, key))?;

        Ok(ObjectInfo {
            key: key.to_string(),
            size: output.content_length().unwrap_or(0).max(0) as u64,
            content_type: output.content_type().map(str::to_string),
            last_modified: output.last_modified().and_then(to_chrono),
            etag: trim_etag(output.e_tag()),
        })
    }

    async fn copy(&self, source_key: &str, dest_key: &str, options: &CopyOptions) -> StorageResult<ObjectInfo> {
        require_key(source_key)?;
        require_key(dest_key)?;

        if options.if_not_exists && self.exists(dest_key).await? {
            return Err(StorageError::AlreadyExists {
                key: dest_key.to_string(),
            });
        }

        self.client
            .copy_object()
            .bucket(&self.bucket)
            .key(dest_key)
            .copy_source(format!("{}/{}", self.bucket, urlencoding::encode(source_key)))
            .send()
            .await
            .map_err(|e| classify(e, source_key))?;

        self.head(dest_key).await
    }

    async fn signed_url(
        &self,
        key: &str,
        operation: SignedUrlOperation,
        options: &SignedUrlOptions,
    ) -> StorageResult<String> {
        require_key(key)?;
        let config = Self::presigning_config(options)?;

        let request = match operation {
            SignedUrlOperation::Get => self
                .client
                .get_object()
                .bucket(&self.bucket)
                .key(key)
                .presigned(config)
                .await
                .map_err(|e| classify(e, key))?,
            SignedUrlOperation::Put => self
                .client
                .put_object()
                .bucket(&self.bucket)
                .key(key)
                .presigned(config)
                .await
                .map_err(|e| classify(e, key))?,
        };

        Ok(request.uri().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_requires_bucket() {
        let settings = S3Settings {
            region: "us-east-1".to_string(),
            ..Default::default()
        };
        let error = S3StorageBackend::new(&settings).await.err().unwrap();
        assert!(matches!(error, StorageError::Configuration { .. }));
    }

    #[tokio::test]
    async fn test_object_url_uses_custom_endpoint() {
        let settings = S3Settings {
            bucket: "docs".to_string(),
            region: "us-east-1".to_string(),
            endpoint_url: Some("http://localhost:9000/".to_string()),
            access_key_id: Some("minio".to_string()),
            secret_access_key: Some("minio123".to_string()),
        };
        let backend = S3StorageBackend::new(&settings).await.unwrap();
        assert_eq!(backend.object_url("documents/a.txt"), "http://localhost:9000/docs/documents/a.txt");
    }

    #[test]
    fn test_key_bounds() {
        assert!(require_key("documents/a.txt").is_ok());
        assert!(require_key("").is_err());
        assert!(require_key(&"k".repeat(1025)).is_err());
    }
}
