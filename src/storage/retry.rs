use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout_at, Instant};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::errors::{AppError, StorageError};

use super::StorageResult;

/// How the storage facade retries failed backend calls
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total tries, including the first
    pub max_attempts: u32,
    /// Delay before the second try; doubles for each try after that
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Budget for one facade call across all of its tries
    pub operation_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            operation_timeout: None,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        let base_delay = Duration::from_millis(config.storage_base_delay_ms);
        Self {
            max_attempts: config.storage_max_attempts.max(1),
            base_delay,
            max_delay: Duration::from_millis(config.storage_max_delay_ms).max(base_delay),
            operation_timeout: config.storage_operation_timeout_secs.map(Duration::from_secs),
        }
    }

    /// Wait after the `attempt`-th failed try: `base * 2^(attempt-1)`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.max(1).saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Sum of the waits a call that fails every try sits through
    pub fn total_backoff(&self) -> Duration {
        (1..self.max_attempts.max(1)).map(|attempt| self.delay_for(attempt)).sum()
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, runs
/// out of attempts or passes the policy's deadline.
///
/// Non-retryable errors are returned as they are after one try. Running out
/// of attempts wraps the last error in `RetriesExhausted`; the deadline
/// produces `DeadlineExceeded`.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, name: &'static str, mut operation: F) -> StorageResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StorageResult<T>>,
{
    let started = Instant::now();
    let deadline = policy.operation_timeout.map(|budget| started + budget);
    let max_attempts = policy.max_attempts.max(1);
    let mut last_error: Option<StorageError> = None;
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;

        let result = match deadline {
            Some(deadline) => match timeout_at(deadline, operation()).await {
                Ok(result) => result,
                Err(_) => {
                    error!(
                        operation = name,
                        attempt,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Storage operation exceeded its deadline"
                    );
                    return Err(StorageError::DeadlineExceeded {
                        operation: name,
                        attempts: attempt,
                        elapsed: started.elapsed(),
                        last_error: last_error.map(Box::new),
                    });
                }
            },
            None => operation().await,
        };

        let error = match result {
            Ok(value) => {
                if attempt > 1 {
                    info!(operation = name, attempt, "Storage operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(error) => error,
        };

        if !error.is_retryable() {
            debug!(operation = name, attempt, error = %error, "Storage operation failed, not retryable");
            return Err(error);
        }

        if attempt >= max_attempts {
            error!(
                operation = name,
                attempts = attempt,
                elapsed_ms = started.elapsed().as_millis() as u64,
                error = %error,
                "Storage operation failed, retries exhausted"
            );
            return Err(StorageError::RetriesExhausted {
                operation: name,
                attempts: attempt,
                elapsed: started.elapsed(),
                source: Box::new(error),
            });
        }

        let delay = policy.delay_for(attempt);
        if let Some(deadline) = deadline {
            if Instant::now() + delay >= deadline {
                error!(
                    operation = name,
                    attempt,
                    error = %error,
                    "Storage operation would pass its deadline before the next retry"
                );
                return Err(StorageError::DeadlineExceeded {
                    operation: name,
                    attempts: attempt,
                    elapsed: started.elapsed(),
                    last_error: Some(Box::new(error)),
                });
            }
        }

        warn!(
            operation = name,
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Storage operation failed, retrying"
        );
        last_error = Some(error);
        sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(50),
            operation_timeout: None,
        }
    }

    #[test]
    fn test_delay_doubles_per_attempt() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(10), Duration::from_secs(30));
        assert_eq!(policy.total_backoff(), Duration::from_secs(3));
    }

    #[test]
    fn test_from_config_never_caps_below_base_delay() {
        let config = Config {
            storage_base_delay_ms: 45_000,
            ..Config::default()
        };
        let policy = RetryPolicy::from_config(&config);
        assert_eq!(policy.max_delay, Duration::from_secs(45));
        assert_eq!(policy.delay_for(1), Duration::from_secs(45));

        let config = Config {
            storage_base_delay_ms: 500,
            storage_max_delay_ms: 2_000,
            ..Config::default()
        };
        let policy = RetryPolicy::from_config(&config);
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(4), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_non_retryable_error_is_returned_unwrapped() {
        let calls = AtomicU32::new(0);
        let result: StorageResult<()> = with_retry(&fast_policy(3), "download", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StorageError::NotFound { key: "a.txt".to_string() }) }
        })
        .await;

        assert!(matches!(result, Err(StorageError::NotFound { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transient_failures_then_success() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&fast_policy(3), "upload", || {
            let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if call < 3 {
                    Err(StorageError::Timeout { details: "slow".to_string() })
                } else {
                    Ok(call)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_deadline_shorter_than_backoff() {
        let policy = RetryPolicy {
            base_delay: Duration::from_secs(10),
            operation_timeout: Some(Duration::from_millis(200)),
            ..fast_policy(5)
        };

        let result: StorageResult<()> = with_retry(&policy, "head", || async {
            Err(StorageError::ServiceUnavailable { details: "503".to_string() })
        })
        .await;

        match result {
            Err(StorageError::DeadlineExceeded { attempts, last_error, .. }) => {
                assert_eq!(attempts, 1);
                assert!(matches!(last_error.as_deref(), Some(StorageError::ServiceUnavailable { .. })));
            }
            other => panic!("expected DeadlineExceeded, got {:?}", other),
        }
    }
}
