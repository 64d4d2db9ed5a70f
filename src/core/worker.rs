//! The job consumer.
//!
//! Each delivery drives one attempt: announce progress, re-affirm
//! PROCESSING, call the engine, persist atomically, and report the
//! outcome. Failures mark the meeting FAILED and propagate so the queue's
//! retry policy takes effect.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, instrument, warn};

use crate::core::queue::JobHandler;
use crate::domain::{MeetingStatus, TranscriptionJob};
use crate::engine::TranscriptionEngine;
use crate::notify::{Notifier, UserEvent};
use crate::store::TranscriptStore;

/// Processes transcription jobs delivered by the queue.
pub struct Worker {
    store: Arc<TranscriptStore>,
    engine: Arc<dyn TranscriptionEngine>,
    notifier: Arc<dyn Notifier>,
    default_language: String,
}

impl Worker {
    pub fn new(
        store: Arc<TranscriptStore>,
        engine: Arc<dyn TranscriptionEngine>,
        notifier: Arc<dyn Notifier>,
        default_language: impl Into<String>,
    ) -> Self {
        Self {
            store,
            engine,
            notifier,
            default_language: default_language.into(),
        }
    }

    #[instrument(skip(self, job), fields(meeting_id = %job.meeting_id, attempt = job.attempt))]
    async fn run_attempt(&self, job: &TranscriptionJob) -> anyhow::Result<()> {
        // Tell the user an attempt is underway. Best-effort.
        self.notify(
            &job.user_id,
            &UserEvent::Progress {
                meeting_id: job.meeting_id.clone(),
            },
        )
        .await;

        match self.transcribe_and_persist(job).await {
            Ok(transcript_id) => {
                info!(%transcript_id, "Transcription completed");
                self.notify(
                    &job.user_id,
                    &UserEvent::Completed {
                        meeting_id: job.meeting_id.clone(),
                        transcript_id,
                    },
                )
                .await;
                Ok(())
            }
            Err(e) => {
                // Leave the meeting FAILED before the error propagates; a
                // redelivery flips it back to PROCESSING.
                if let Err(status_err) = self
                    .store
                    .set_meeting_status(&job.meeting_id, MeetingStatus::Failed)
                {
                    warn!(error = %status_err, "Could not mark meeting FAILED");
                }

                self.notify(
                    &job.user_id,
                    &UserEvent::Failed {
                        meeting_id: job.meeting_id.clone(),
                        error: e.to_string(),
                    },
                )
                .await;

                Err(e)
            }
        }
    }

    async fn transcribe_and_persist(&self, job: &TranscriptionJob) -> anyhow::Result<String> {
        // Idempotent re-affirmation; tolerates redelivery after a failure.
        self.store
            .set_meeting_status(&job.meeting_id, MeetingStatus::Processing)?;

        let language = self.language_for(&job.meeting_id);

        // May take minutes; no store lock is held across it.
        let result = self.engine.transcribe(&job.audio_ref, &language).await?;
        let result = result.normalized()?;

        let transcript_id = self.store.replace_transcript(
            &job.meeting_id,
            &result.text,
            &result.language,
            result.confidence,
            &result.segments,
            &result.speakers,
        )?;

        Ok(transcript_id)
    }

    /// Prior transcript language wins on re-transcription, else the
    /// configured default.
    fn language_for(&self, meeting_id: &str) -> String {
        match self.store.get_transcript(meeting_id) {
            Ok(Some(transcript)) => transcript.language,
            _ => self.default_language.clone(),
        }
    }

    async fn notify(&self, user_id: &str, event: &UserEvent) {
        if let Err(e) = self.notifier.publish(user_id, event).await {
            warn!(user_id, event = event.name(), error = %e, "Failed to publish user event");
        }
    }
}

#[async_trait]
impl JobHandler for Worker {
    async fn process(&self, job: &TranscriptionJob) -> anyhow::Result<()> {
        self.run_attempt(job).await
    }
}
