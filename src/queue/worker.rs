use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{FailOutcome, QueueResult, TaskQueue};
use crate::config::Config;
use crate::errors::{AppError, TaskError};
use crate::models::{QueueItem, TaskType};

/// Work performed for one kind of queue item
#[async_trait]
pub trait TaskHandler: Send + Sync {
    fn handles(&self, task_type: TaskType) -> bool;

    async fn handle(&self, item: &QueueItem) -> Result<(), TaskError>;
}

/// What happened to a claimed item
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    Completed,
    Retrying(QueueItem),
    Failed(QueueItem),
}

/// Polls the task queue and runs claimed items through a handler, at most
/// `concurrency` at a time.
#[derive(Clone)]
pub struct QueueWorker {
    queue: TaskQueue,
    handler: Arc<dyn TaskHandler>,
    concurrency: usize,
    poll_interval: Duration,
    stale_claim_age: Duration,
    is_paused: Arc<AtomicBool>,
}

impl QueueWorker {
    pub fn new(queue: TaskQueue, handler: Arc<dyn TaskHandler>) -> Self {
        Self {
            queue,
            handler,
            concurrency: 2,
            poll_interval: Duration::from_secs(1),
            stale_claim_age: Duration::from_secs(15 * 60),
            is_paused: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn from_config(queue: TaskQueue, handler: Arc<dyn TaskHandler>, config: &Config) -> Self {
        Self::new(queue, handler)
            .with_concurrency(config.worker_concurrency)
            .with_poll_interval(Duration::from_millis(config.worker_poll_interval_ms))
            .with_stale_claim_age(config.stale_claim_age())
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_stale_claim_age(mut self, stale_claim_age: Duration) -> Self {
        self.stale_claim_age = stale_claim_age;
        self
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    pub fn pause(&self) {
        self.is_paused.store(true, Ordering::SeqCst);
        info!("Queue processing paused");
    }

    pub fn resume(&self) {
        self.is_paused.store(false, Ordering::SeqCst);
        info!("Queue processing resumed");
    }

    pub fn is_paused(&self) -> bool {
        self.is_paused.load(Ordering::SeqCst)
    }

    /// Run the handler for a claimed item and record the outcome. Handler
    /// failures end up on the queue item; only store failures are returned.
    pub async fn process_item(&self, item: QueueItem) -> QueueResult<ProcessOutcome> {
        let started = Instant::now();

        if !self.handler.handles(item.task_type) {
            error!(queue_id = item.id, task_type = %item.task_type, "No handler for task type");
            let failed = self
                .queue
                .fail_permanently(item.id, &format!("no handler for task type {}", item.task_type))
                .await?;
            return Ok(ProcessOutcome::Failed(failed));
        }

        match self.handler.handle(&item).await {
            Ok(()) => {
                self.queue.complete(item.id).await?;
                info!(
                    queue_id = item.id,
                    document_id = item.document_id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Processed queue item"
                );
                Ok(ProcessOutcome::Completed)
            }
            Err(e) if e.is_retryable() => match self.queue.fail(item.id, &e.to_string()).await? {
                FailOutcome::Retrying(item) => Ok(ProcessOutcome::Retrying(item)),
                FailOutcome::Failed(item) => Ok(ProcessOutcome::Failed(item)),
            },
            Err(e) => {
                warn!(
                    queue_id = item.id,
                    error_code = e.error_code(),
                    "Task failed permanently, not retrying"
                );
                let failed = self.queue.fail_permanently(item.id, &e.to_string()).await?;
                Ok(ProcessOutcome::Failed(failed))
            }
        }
    }

    /// Claim and process a single item inline
    pub async fn run_once(&self) -> QueueResult<Option<ProcessOutcome>> {
        match self.queue.get_next().await? {
            Some(item) => Ok(Some(self.process_item(item).await?)),
            None => Ok(None),
        }
    }

    /// Process items inline until none is eligible
    pub async fn drain(&self) -> QueueResult<usize> {
        let mut processed = 0;
        while self.run_once().await?.is_some() {
            processed += 1;
        }
        Ok(processed)
    }

    /// Worker loop. Returns after `shutdown` is cancelled and in-flight items
    /// have finished.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) -> anyhow::Result<()> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let sweep_every = (self.stale_claim_age / 2).max(Duration::from_secs(1));
        let mut last_sweep: Option<Instant> = None;

        info!(
            "Starting queue worker {} with {} concurrent jobs",
            self.queue.worker_id(),
            self.concurrency
        );

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            if last_sweep.map_or(true, |at| at.elapsed() >= sweep_every) {
                if let Err(e) = self.queue.recover_stale_claims(self.stale_claim_age).await {
                    error!("Stale claim sweep failed: {}", e);
                }
                last_sweep = Some(Instant::now());
            }

            if self.is_paused() {
                debug!("Queue processing is paused, waiting...");
                if idle(&shutdown, self.poll_interval).await {
                    break;
                }
                continue;
            }

            // Hold a slot before claiming so nothing is claimed without capacity to run it
            let permit = tokio::select! {
                _ = shutdown.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => permit?,
            };

            match self.queue.get_next().await {
                Ok(Some(item)) => {
                    let worker = Arc::clone(&self);
                    tokio::spawn(async move {
                        let queue_id = item.id;
                        if let Err(e) = worker.process_item(item).await {
                            error!(queue_id, "Error recording queue item outcome: {}", e);
                        }
                        drop(permit);
                    });
                }
                Ok(None) => {
                    drop(permit);
                    if idle(&shutdown, self.poll_interval).await {
                        break;
                    }
                }
                Err(e) => {
                    drop(permit);
                    error!("Error claiming queue item: {}", e);
                    if idle(&shutdown, self.poll_interval).await {
                        break;
                    }
                }
            }
        }

        info!("Queue worker {} stopping, waiting for in-flight items", self.queue.worker_id());
        let _ = semaphore.acquire_many(self.concurrency as u32).await?;
        info!("Queue worker {} stopped", self.queue.worker_id());
        Ok(())
    }
}

/// Sleep for `duration`; true when shutdown was requested meanwhile
async fn idle(shutdown: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => true,
        _ = sleep(duration) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{DocumentRepository, MemoryStore, Store};
    use crate::models::{NewDocument, QueueStatus};
    use crate::queue::EnqueueOptions;
    use std::sync::atomic::AtomicU32;

    struct FlakyHandler {
        failures_left: AtomicU32,
        retryable: bool,
    }

    #[async_trait]
    impl TaskHandler for FlakyHandler {
        fn handles(&self, task_type: TaskType) -> bool {
            task_type == TaskType::ExtractText
        }

        async fn handle(&self, item: &QueueItem) -> Result<(), TaskError> {
            let left = self.failures_left.load(Ordering::SeqCst);
            if left == 0 {
                return Ok(());
            }
            self.failures_left.store(left - 1, Ordering::SeqCst);
            if self.retryable {
                Err(TaskError::Failed {
                    document_id: item.document_id,
                    details: "transient".to_string(),
                })
            } else {
                Err(TaskError::UnsupportedContent {
                    document_id: item.document_id,
                    details: "binary".to_string(),
                })
            }
        }
    }

    async fn setup(failures: u32, retryable: bool) -> (QueueWorker, i64) {
        let store: Store = Arc::new(MemoryStore::new());
        let document = store
            .create_document(NewDocument::new("documents/a.txt", "a.txt", "hash-a", 3, "user-1"))
            .await
            .unwrap();
        let queue = TaskQueue::new(store).with_retry_delays(Duration::ZERO, Duration::ZERO);
        let item = queue
            .enqueue(document.id, TaskType::ExtractText, EnqueueOptions::default())
            .await
            .unwrap();
        let handler = Arc::new(FlakyHandler {
            failures_left: AtomicU32::new(failures),
            retryable,
        });
        (QueueWorker::new(queue, handler), item.id)
    }

    #[tokio::test]
    async fn test_retryable_failure_then_success() {
        let (worker, id) = setup(1, true).await;

        assert!(matches!(worker.run_once().await.unwrap(), Some(ProcessOutcome::Retrying(_))));
        assert_eq!(worker.run_once().await.unwrap(), Some(ProcessOutcome::Completed));

        let item = worker.queue().find(id).await.unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Done);
        assert_eq!(item.attempts, 1);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let (worker, id) = setup(1, false).await;

        assert!(matches!(worker.run_once().await.unwrap(), Some(ProcessOutcome::Failed(_))));
        assert_eq!(worker.run_once().await.unwrap(), None);

        let item = worker.queue().find(id).await.unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Failed);
        assert_eq!(item.attempts, 1);
    }

    #[tokio::test]
    async fn test_drain_stops_at_attempt_cap() {
        let (worker, id) = setup(10, true).await;

        assert_eq!(worker.drain().await.unwrap(), 3);
        let item = worker.queue().find(id).await.unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Failed);
        assert_eq!(item.attempts, 3);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancellation() {
        let (worker, id) = setup(0, true).await;
        let worker = Arc::new(worker.with_poll_interval(Duration::from_millis(10)));
        let shutdown = CancellationToken::new();

        let handle = tokio::spawn(Arc::clone(&worker).run(shutdown.clone()));
        for _ in 0..200 {
            let item = worker.queue().find(id).await.unwrap().unwrap();
            if item.status == QueueStatus::Done {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        shutdown.cancel();
        handle.await.unwrap().unwrap();

        let item = worker.queue().find(id).await.unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Done);
    }
}
