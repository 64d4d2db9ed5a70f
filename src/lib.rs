//! meetscribe - Meeting transcription pipeline
//!
//! Converts a recorded meeting's audio reference into a persisted,
//! speaker-segmented transcript while keeping the owning user informed of
//! progress in real time.
//!
//! # Architecture
//!
//! - Requests enter through the `Orchestrator`, which validates the
//!   meeting, durably enqueues a job, then flips the meeting to PROCESSING
//! - The `JobQueue` journals jobs to disk and redelivers failed attempts
//!   with exponential backoff (3 attempts: 5s, 10s between them)
//! - The `Worker` calls the configured transcription engine and persists
//!   the transcript graph in a single transaction
//! - Every milestone is published to the owning user via the `Notifier`
//!
//! # Modules
//!
//! - `core`: orchestration logic (Orchestrator, JobQueue, Worker)
//! - `domain`: data structures (Meeting, Transcript, TranscriptionJob)
//! - `engine`: speech-to-text engine boundary and implementations
//! - `notify`: best-effort user event publishing
//! - `store`: SQLite persistence gateway
//! - `cli`: command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Create a meeting and attach its recording
//! meetscribe new "Weekly sync" --platform meet
//! meetscribe attach-audio <meeting-id> audio/weekly.wav
//!
//! # Transcribe it
//! meetscribe transcribe <meeting-id>
//!
//! # Inspect the result
//! meetscribe show <meeting-id> --full
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod engine;
pub mod notify;
pub mod store;

// Re-export main types at crate root for convenience
pub use crate::core::{
    JobHandler, JobQueue, JobRunner, Orchestrator, PipelineError, QueueError, RetryPolicy, Worker,
};
pub use crate::domain::{Meeting, MeetingStatus, Transcript, TranscriptionJob};
pub use crate::engine::{EngineError, TranscriptResult, TranscriptionEngine};
pub use crate::notify::{BroadcastNotifier, LogNotifier, Notifier, UserEvent};
pub use crate::store::{StoreError, TranscriptStore};
