use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_PRIORITY: i32 = 5;
pub const DEFAULT_MAX_ATTEMPTS: i32 = 3;

/// Kind of background work a queue item asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    ExtractText,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::ExtractText => "extract_text",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "extract_text" => Ok(TaskType::ExtractText),
            other => Err(format!("unknown task type '{}'", other)),
        }
    }
}

/// Queue item state machine:
///
/// ```text
/// queued --claim--> processing --complete--> done
///    ^                  |
///    |                  +--fail--> failed
///    +--retry / stale sweep--------+
/// ```
///
/// `done` and `failed` are terminal; `failed` only returns to `queued`
/// through an explicit retry while attempts remain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Queued,
    Processing,
    Done,
    Failed,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Queued => "queued",
            QueueStatus::Processing => "processing",
            QueueStatus::Done => "done",
            QueueStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, QueueStatus::Done | QueueStatus::Failed)
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(QueueStatus::Queued),
            "processing" => Ok(QueueStatus::Processing),
            "done" => Ok(QueueStatus::Done),
            "failed" => Ok(QueueStatus::Failed),
            other => Err(format!("unknown queue status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: i64,
    pub document_id: i64,
    pub task_type: TaskType,
    /// Lower values are serviced first
    pub priority: i32,
    pub status: QueueStatus,
    pub attempts: i32,
    pub max_attempts: i32,
    /// Not eligible for claiming before this instant
    pub scheduled_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub worker_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QueueItem {
    pub fn has_attempts_left(&self) -> bool {
        self.attempts < self.max_attempts
    }

    /// Whether a claim at `now` may pick this item
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.status == QueueStatus::Queued
            && self.has_attempts_left()
            && self.scheduled_at.map_or(true, |at| at <= now)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewQueueItem {
    pub document_id: i64,
    pub task_type: TaskType,
    pub priority: i32,
    pub max_attempts: i32,
    pub scheduled_at: Option<DateTime<Utc>>,
}

impl NewQueueItem {
    pub fn into_queue_item(self, id: i64, now: DateTime<Utc>) -> QueueItem {
        QueueItem {
            id,
            document_id: self.document_id,
            task_type: self.task_type,
            priority: self.priority,
            status: QueueStatus::Queued,
            attempts: 0,
            max_attempts: self.max_attempts,
            scheduled_at: self.scheduled_at,
            error_message: None,
            claimed_at: None,
            worker_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Outcome of an attempt to put an item back in the queue
#[derive(Debug, Clone, PartialEq)]
pub enum RescheduleOutcome {
    Rescheduled(QueueItem),
    /// The item had no attempts left and was left (or put) in `failed`
    LimitReached(QueueItem),
    NotFound,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Queued and eligible right now
    pub ready_count: i64,
    /// Queued but scheduled for later
    pub scheduled_count: i64,
    pub processing_count: i64,
    pub done_count: i64,
    pub failed_count: i64,
}

impl QueueStats {
    pub fn total(&self) -> i64 {
        self.ready_count + self.scheduled_count + self.processing_count + self.done_count + self.failed_count
    }
}
