//! Public entry point for (re)queueing transcriptions.
//!
//! Validates that a meeting is eligible, durably enqueues a job, then
//! flips the meeting to PROCESSING. The enqueue comes first so an enqueue
//! failure never strands a meeting in PROCESSING with no job behind it.

use std::sync::Arc;

use tracing::{info, instrument};

use crate::core::error::PipelineError;
use crate::core::queue::{JobQueue, QueueError};
use crate::domain::{MeetingStatus, TranscriptionJob};
use crate::store::TranscriptStore;

/// Accepts transcription requests and hands them to the job queue.
pub struct Orchestrator {
    store: Arc<TranscriptStore>,
    queue: JobQueue,
}

impl Orchestrator {
    pub fn new(store: Arc<TranscriptStore>, queue: JobQueue) -> Self {
        Self { store, queue }
    }

    /// Queue a transcription for a meeting owned by `user_id`.
    ///
    /// On return the job is durably journaled and the meeting is
    /// PROCESSING. A submission while another job for the same meeting is
    /// outstanding is rejected with `AlreadyQueued`.
    #[instrument(skip(self))]
    pub async fn queue_transcription(
        &self,
        meeting_id: &str,
        audio_ref: &str,
        user_id: &str,
    ) -> Result<String, PipelineError> {
        if audio_ref.trim().is_empty() {
            return Err(PipelineError::InvalidAudioRef);
        }

        let meeting = self
            .store
            .get_meeting(meeting_id)?
            .ok_or_else(|| PipelineError::NotFound(meeting_id.to_string()))?;

        if meeting.user_id != user_id {
            return Err(PipelineError::Forbidden {
                meeting_id: meeting_id.to_string(),
                user_id: user_id.to_string(),
            });
        }

        let job = TranscriptionJob::new(meeting_id, audio_ref, user_id);
        let job_id = self.queue.enqueue(job).await.map_err(|e| match e {
            QueueError::DuplicateJob(meeting) => PipelineError::AlreadyQueued(meeting),
            other => PipelineError::QueueUnavailable(other),
        })?;

        // Durable enqueue first, status second. If this update fails the
        // worker re-affirms PROCESSING at the start of the attempt.
        self.store
            .set_meeting_status(meeting_id, MeetingStatus::Processing)?;

        info!(%job_id, meeting_id, "Transcription queued");
        Ok(job_id)
    }

    /// Manual re-submission, e.g. after a FAILED attempt.
    #[instrument(skip(self))]
    pub async fn retry_transcription(&self, meeting_id: &str) -> Result<String, PipelineError> {
        let meeting = self
            .store
            .get_meeting(meeting_id)?
            .ok_or_else(|| PipelineError::NotFound(meeting_id.to_string()))?;

        let audio_ref = meeting
            .audio_ref
            .clone()
            .ok_or_else(|| PipelineError::NotFound(meeting_id.to_string()))?;

        self.queue_transcription(&meeting.id, &audio_ref, &meeting.user_id)
            .await
    }
}
