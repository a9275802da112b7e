//! Background processing: the durable job queue and the import worker

mod job_queue;
mod worker;

pub use job_queue::{QueueClient, Recovery, SqliteJobQueue};
pub use worker::{ImportWorker, PROGRESS_DONE, PROGRESS_PARSED, PROGRESS_STARTED};
