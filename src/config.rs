use anyhow::{anyhow, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

const DEV_SIGNING_SECRET: &str = "docflow-dev-signing-secret";

/// Which entity store backend to run against
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Database,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "database" | "sqlite" => Ok(StoreBackend::Database),
            other => Err(anyhow!("Unknown STORE_BACKEND '{}', expected memory or database", other)),
        }
    }
}

/// Which file storage backend to run against
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageBackendKind {
    Local,
    S3,
}

impl FromStr for StorageBackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "local" | "filesystem" => Ok(StorageBackendKind::Local),
            "s3" => Ok(StorageBackendKind::S3),
            other => Err(anyhow!("Unknown STORAGE_BACKEND '{}', expected local or s3", other)),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct S3Settings {
    pub bucket: String,
    pub region: String,
    pub endpoint_url: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub store_backend: StoreBackend,
    pub database_url: String,
    pub storage_backend: StorageBackendKind,
    pub upload_path: String,
    pub public_base_url: String,
    pub signing_secret: String,
    pub s3: S3Settings,
    pub max_file_size_mb: u64,
    pub storage_max_attempts: u32,
    pub storage_base_delay_ms: u64,
    pub storage_max_delay_ms: u64,
    pub storage_operation_timeout_secs: Option<u64>,
    pub queue_retry_delay_secs: u64,
    pub queue_max_retry_delay_secs: u64,
    pub worker_concurrency: usize,
    pub worker_poll_interval_ms: u64,
    pub stale_claim_minutes: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            store_backend: StoreBackend::Memory,
            database_url: "sqlite://docflow.db".to_string(),
            storage_backend: StorageBackendKind::Local,
            upload_path: "./uploads".to_string(),
            public_base_url: "http://localhost:8000/files".to_string(),
            signing_secret: DEV_SIGNING_SECRET.to_string(),
            s3: S3Settings {
                region: "us-east-1".to_string(),
                ..Default::default()
            },
            max_file_size_mb: 50,
            storage_max_attempts: 3,
            storage_base_delay_ms: 1000,
            storage_max_delay_ms: 30_000,
            storage_operation_timeout_secs: None,
            queue_retry_delay_secs: 60,
            queue_max_retry_delay_secs: 3600,
            worker_concurrency: 2,
            worker_poll_interval_ms: 1000,
            stale_claim_minutes: 15,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Config::default();

        let config = Config {
            store_backend: match env::var("STORE_BACKEND") {
                Ok(value) => value.parse()?,
                Err(_) => defaults.store_backend,
            },
            database_url: env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            storage_backend: match env::var("STORAGE_BACKEND") {
                Ok(value) => value.parse()?,
                Err(_) => defaults.storage_backend,
            },
            upload_path: env::var("UPLOAD_PATH").unwrap_or(defaults.upload_path),
            public_base_url: env::var("PUBLIC_BASE_URL").unwrap_or(defaults.public_base_url),
            signing_secret: env::var("SIGNING_SECRET").unwrap_or(defaults.signing_secret),
            s3: S3Settings {
                bucket: env::var("S3_BUCKET").unwrap_or_default(),
                region: env::var("S3_REGION").unwrap_or(defaults.s3.region),
                endpoint_url: env::var("S3_ENDPOINT_URL").ok(),
                access_key_id: env::var("S3_ACCESS_KEY_ID").ok(),
                secret_access_key: env::var("S3_SECRET_ACCESS_KEY").ok(),
            },
            max_file_size_mb: parse_or("MAX_FILE_SIZE_MB", defaults.max_file_size_mb),
            storage_max_attempts: parse_or("STORAGE_MAX_ATTEMPTS", defaults.storage_max_attempts),
            storage_base_delay_ms: parse_or("STORAGE_BASE_DELAY_MS", defaults.storage_base_delay_ms),
            storage_max_delay_ms: parse_or("STORAGE_MAX_DELAY_MS", defaults.storage_max_delay_ms),
            storage_operation_timeout_secs: env::var("STORAGE_OPERATION_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok()),
            queue_retry_delay_secs: parse_or("QUEUE_RETRY_DELAY_SECS", defaults.queue_retry_delay_secs),
            queue_max_retry_delay_secs: parse_or("QUEUE_MAX_RETRY_DELAY_SECS", defaults.queue_max_retry_delay_secs),
            worker_concurrency: parse_or("WORKER_CONCURRENCY", defaults.worker_concurrency),
            worker_poll_interval_ms: parse_or("WORKER_POLL_INTERVAL_MS", defaults.worker_poll_interval_ms),
            stale_claim_minutes: parse_or("STALE_CLAIM_MINUTES", defaults.stale_claim_minutes),
        };

        config.validate()?;

        if config.signing_secret == DEV_SIGNING_SECRET {
            warn!("SIGNING_SECRET is not set, signed URLs use the development secret");
        }

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.storage_max_attempts == 0 {
            return Err(anyhow!("STORAGE_MAX_ATTEMPTS must be at least 1"));
        }
        if self.worker_concurrency == 0 {
            return Err(anyhow!("WORKER_CONCURRENCY must be at least 1"));
        }
        if self.storage_backend == StorageBackendKind::S3 && self.s3.bucket.is_empty() {
            return Err(anyhow!("S3_BUCKET is required when STORAGE_BACKEND=s3"));
        }
        Ok(())
    }

    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb * 1024 * 1024
    }

    pub fn queue_retry_delay(&self) -> Duration {
        Duration::from_secs(self.queue_retry_delay_secs)
    }

    pub fn queue_max_retry_delay(&self) -> Duration {
        Duration::from_secs(self.queue_max_retry_delay_secs)
    }

    pub fn stale_claim_age(&self) -> Duration {
        Duration::from_secs(self.stale_claim_minutes * 60)
    }
}

/// Read a numeric variable, falling back when it is unset or unparsable
fn parse_or<T: FromStr>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                warn!("Ignoring invalid value '{}' for {}", raw, name);
                default
            }
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_names_parse() {
        assert_eq!("memory".parse::<StoreBackend>().unwrap(), StoreBackend::Memory);
        assert_eq!("Database".parse::<StoreBackend>().unwrap(), StoreBackend::Database);
        assert_eq!("s3".parse::<StorageBackendKind>().unwrap(), StorageBackendKind::S3);
        assert!("postgres".parse::<StoreBackend>().is_err());
    }

    #[test]
    fn test_s3_requires_bucket() {
        let config = Config {
            storage_backend: StorageBackendKind::S3,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.queue_retry_delay(), Duration::from_secs(60));
        assert_eq!(config.stale_claim_age(), Duration::from_secs(900));
    }
}
