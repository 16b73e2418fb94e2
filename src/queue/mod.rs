pub mod extraction;
pub mod task_queue;
pub mod worker;

pub use extraction::{extract_plain_text, TextExtractionHandler};
pub use task_queue::{EnqueueOptions, FailOutcome, QueueResult, TaskQueue};
pub use worker::{ProcessOutcome, QueueWorker, TaskHandler};
