//! Pipeline core: orchestrator, durable job queue, and the worker that
//! drives the meeting state machine.

pub mod error;
pub mod orchestrator;
pub mod queue;
pub mod worker;

pub use error::PipelineError;
pub use orchestrator::Orchestrator;
pub use queue::{job_id_for, JobHandler, JobQueue, JobRunner, QueueError, QueueStatus, RetryPolicy};
pub use worker::Worker;
