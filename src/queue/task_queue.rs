use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::db::{current_timestamp, Store};
use crate::errors::QueueError;
use crate::models::{
    NewQueueItem, QueueItem, QueueStats, QueueStatus, RescheduleOutcome, TaskType, DEFAULT_MAX_ATTEMPTS,
    DEFAULT_PRIORITY,
};

pub type QueueResult<T> = Result<T, QueueError>;

const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(60);
const DEFAULT_MAX_RETRY_DELAY: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, PartialEq)]
pub struct EnqueueOptions {
    pub priority: i32,
    pub max_attempts: i32,
    pub scheduled_at: Option<DateTime<Utc>>,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            priority: DEFAULT_PRIORITY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            scheduled_at: None,
        }
    }
}

impl EnqueueOptions {
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }
}

/// What `fail` did with the item
#[derive(Debug, Clone, PartialEq)]
pub enum FailOutcome {
    /// Back in the queue, eligible again at `scheduled_at`
    Retrying(QueueItem),
    /// Attempts used up; the item is terminal
    Failed(QueueItem),
}

/// Priority and schedule ordered work list on top of the entity store.
///
/// The queue holds no state of its own. Every transition is a single store
/// operation, so any number of `TaskQueue` handles (in one process or
/// several sharing a database) coordinate through the store alone.
#[derive(Clone)]
pub struct TaskQueue {
    store: Store,
    worker_id: String,
    retry_delay: Duration,
    max_retry_delay: Duration,
}

impl TaskQueue {
    pub fn new(store: Store) -> Self {
        let worker_id = format!(
            "worker-{}-{}",
            hostname::get().unwrap_or_default().to_string_lossy(),
            Uuid::new_v4()
        );

        Self {
            store,
            worker_id,
            retry_delay: DEFAULT_RETRY_DELAY,
            max_retry_delay: DEFAULT_MAX_RETRY_DELAY,
        }
    }

    pub fn from_config(store: Store, config: &Config) -> Self {
        Self::new(store).with_retry_delays(config.queue_retry_delay(), config.queue_max_retry_delay())
    }

    pub fn with_retry_delays(mut self, base: Duration, max: Duration) -> Self {
        self.retry_delay = base;
        self.max_retry_delay = max.max(base);
        self
    }

    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Delay before the next attempt of an item that has failed `attempts`
    /// times: `base * 2^(attempts-1)`, capped at the configured maximum.
    pub fn retry_delay_for(&self, attempts: i32) -> Duration {
        let exponent = (attempts.max(1) - 1).min(31) as u32;
        self.retry_delay
            .checked_mul(2u32.saturating_pow(exponent))
            .unwrap_or(self.max_retry_delay)
            .min(self.max_retry_delay)
    }

    pub async fn enqueue(
        &self,
        document_id: i64,
        task_type: TaskType,
        options: EnqueueOptions,
    ) -> QueueResult<QueueItem> {
        if options.max_attempts < 1 {
            return Err(QueueError::InvalidMaxAttempts {
                value: options.max_attempts,
            });
        }

        let item = self
            .store
            .create_queue_item(NewQueueItem {
                document_id,
                task_type,
                priority: options.priority,
                max_attempts: options.max_attempts,
                scheduled_at: options.scheduled_at,
            })
            .await?;

        info!(
            queue_id = item.id,
            document_id,
            task_type = %task_type,
            priority = item.priority,
            scheduled_at = ?item.scheduled_at,
            "Enqueued task"
        );
        Ok(item)
    }

    /// Enqueue several tasks with the same options. Stops at the first
    /// failure; items created before it stay queued.
    pub async fn enqueue_batch(
        &self,
        tasks: &[(i64, TaskType)],
        options: EnqueueOptions,
    ) -> QueueResult<Vec<QueueItem>> {
        let mut items = Vec::with_capacity(tasks.len());
        for (document_id, task_type) in tasks {
            items.push(self.enqueue(*document_id, *task_type, options.clone()).await?);
        }
        info!("Enqueued batch of {} tasks", items.len());
        Ok(items)
    }

    /// Claim the next eligible item for this worker, if any
    pub async fn get_next(&self) -> QueueResult<Option<QueueItem>> {
        let claimed = self
            .store
            .claim_next_queue_item(current_timestamp(), &self.worker_id)
            .await?;

        if let Some(item) = &claimed {
            debug!(
                queue_id = item.id,
                document_id = item.document_id,
                priority = item.priority,
                attempts = item.attempts,
                worker_id = %self.worker_id,
                "Claimed task"
            );
        }
        Ok(claimed)
    }

    pub async fn update_status(&self, id: i64, status: QueueStatus) -> QueueResult<()> {
        if !self.store.set_queue_status(id, status).await? {
            return Err(QueueError::NotFound { id });
        }
        info!(queue_id = id, status = %status, "Queue item status updated");
        Ok(())
    }

    /// Count a failed attempt and keep its message. Status is untouched.
    pub async fn update_error(&self, id: i64, message: &str) -> QueueResult<QueueItem> {
        let item = self
            .store
            .record_queue_error(id, message)
            .await?
            .ok_or(QueueError::NotFound { id })?;

        warn!(
            queue_id = id,
            attempts = item.attempts,
            max_attempts = item.max_attempts,
            error = message,
            "Recorded task failure"
        );
        Ok(item)
    }

    /// Put the item back in the queue after the backoff delay. Refused once
    /// the item has used all of its attempts; it is then left `failed`.
    pub async fn retry(&self, id: i64) -> QueueResult<QueueItem> {
        let current = self
            .store
            .find_queue_item(id)
            .await?
            .ok_or(QueueError::NotFound { id })?;

        let delay = self.retry_delay_for(current.attempts);
        let scheduled_at = shift(Utc::now(), delay, Shift::Later);

        match self.store.reschedule_queue_item(id, scheduled_at).await? {
            RescheduleOutcome::Rescheduled(item) => {
                info!(
                    queue_id = id,
                    attempts = item.attempts,
                    max_attempts = item.max_attempts,
                    delay_secs = delay.as_secs(),
                    "Task scheduled for retry"
                );
                Ok(item)
            }
            RescheduleOutcome::LimitReached(item) => {
                error!(
                    queue_id = id,
                    attempts = item.attempts,
                    max_attempts = item.max_attempts,
                    "Task retry refused, attempts exhausted"
                );
                Err(QueueError::RetryLimitReached {
                    id,
                    attempts: item.attempts,
                    max_attempts: item.max_attempts,
                })
            }
            RescheduleOutcome::NotFound => Err(QueueError::NotFound { id }),
        }
    }

    pub async fn complete(&self, id: i64) -> QueueResult<()> {
        if !self.store.set_queue_status(id, QueueStatus::Done).await? {
            return Err(QueueError::NotFound { id });
        }
        info!(queue_id = id, "Task completed");
        Ok(())
    }

    /// Record a failed attempt, then retry with backoff while attempts
    /// remain. The last failure leaves the item `failed`.
    pub async fn fail(&self, id: i64, message: &str) -> QueueResult<FailOutcome> {
        self.update_error(id, message).await?;

        match self.retry(id).await {
            Ok(item) => Ok(FailOutcome::Retrying(item)),
            Err(QueueError::RetryLimitReached { .. }) => {
                let item = self
                    .store
                    .find_queue_item(id)
                    .await?
                    .ok_or(QueueError::NotFound { id })?;
                Ok(FailOutcome::Failed(item))
            }
            Err(e) => Err(e),
        }
    }

    /// Record a failure that no further attempt can fix and end the item
    pub async fn fail_permanently(&self, id: i64, message: &str) -> QueueResult<QueueItem> {
        self.update_error(id, message).await?;
        self.update_status(id, QueueStatus::Failed).await?;
        self.store
            .find_queue_item(id)
            .await?
            .ok_or(QueueError::NotFound { id })
    }

    pub async fn find(&self, id: i64) -> QueueResult<Option<QueueItem>> {
        Ok(self.store.find_queue_item(id).await?)
    }

    /// Newest first
    pub async fn find_by_document(&self, document_id: i64) -> QueueResult<Vec<QueueItem>> {
        Ok(self.store.find_queue_items_by_document(document_id).await?)
    }

    /// Newest first
    pub async fn find_all(&self) -> QueueResult<Vec<QueueItem>> {
        Ok(self.store.find_all_queue_items().await?)
    }

    /// Return items claimed longer than `max_age` ago to the queue. Their
    /// worker is assumed dead; the attempt is not counted. Items that have
    /// already used every attempt end `failed` instead.
    pub async fn recover_stale_claims(&self, max_age: Duration) -> QueueResult<u64> {
        let cutoff = shift(Utc::now(), max_age, Shift::Earlier);
        let recovered = self.store.recover_stale_claims(cutoff).await?;
        if recovered > 0 {
            warn!("Recovered {} stale queue items older than {:?}", recovered, max_age);
        }
        Ok(recovered)
    }

    pub async fn purge_done(&self, older_than: Duration) -> QueueResult<u64> {
        let cutoff = shift(Utc::now(), older_than, Shift::Earlier);
        let removed = self.store.purge_done_queue_items(cutoff).await?;
        info!("Purged {} finished queue items", removed);
        Ok(removed)
    }

    /// Administrative wipe of every queue item
    pub async fn clear(&self) -> QueueResult<u64> {
        let removed = self.store.clear_queue().await?;
        warn!("Cleared {} queue items", removed);
        Ok(removed)
    }

    pub async fn stats(&self) -> QueueResult<QueueStats> {
        Ok(self.store.queue_stats(current_timestamp()).await?)
    }
}

enum Shift {
    Earlier,
    Later,
}

/// Move `from` by `by`, saturating at the representable range
fn shift(from: DateTime<Utc>, by: Duration, direction: Shift) -> DateTime<Utc> {
    let delta = chrono::Duration::from_std(by).ok();
    match direction {
        Shift::Later => delta
            .and_then(|d| from.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC),
        Shift::Earlier => delta
            .and_then(|d| from.checked_sub_signed(d))
            .unwrap_or(DateTime::<Utc>::MIN_UTC),
    }
}
