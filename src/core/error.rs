//! Error taxonomy for the pipeline's public entry points.

use thiserror::Error;

use crate::core::queue::QueueError;
use crate::store::StoreError;

/// Failures surfaced by the orchestrator.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Referenced meeting (or its stored audio reference) does not exist.
    /// Never retried; surfaced to the caller.
    #[error("Meeting or audio reference not found: {0}")]
    NotFound(String),

    /// The meeting belongs to a different user.
    #[error("Meeting {meeting_id} does not belong to user {user_id}")]
    Forbidden {
        meeting_id: String,
        user_id: String,
    },

    /// The audio reference is not a usable storage key.
    #[error("Audio reference must be a non-empty storage key")]
    InvalidAudioRef,

    /// A job for this meeting is already outstanding.
    #[error("A transcription job for meeting {0} is already outstanding")]
    AlreadyQueued(String),

    /// Store unavailable or a transaction failed.
    #[error("Persistence failure: {0}")]
    Persistence(#[from] StoreError),

    /// The enqueue itself failed; no status change was made.
    #[error("Job queue unavailable: {0}")]
    QueueUnavailable(QueueError),
}
