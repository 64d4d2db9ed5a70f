//! Transcription engine boundary.
//!
//! Engines provide a unified interface for turning an audio reference into
//! a transcript. Any implementation satisfies the contract as long as it is
//! safe to retry; the worker never holds store state across the call.

pub mod api;
pub mod whisper;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{NewSegment, NewSpeaker};

pub use api::WhisperApiEngine;
pub use whisper::WhisperBinaryEngine;

/// External engine failure. Attempts that hit this are retried by the
/// job queue.
#[derive(Debug, Error)]
#[error("Transcription engine error: {0}")]
pub struct EngineError(#[from] anyhow::Error);

/// Result of transcribing one audio reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptResult {
    /// Full transcript text
    pub text: String,

    /// Detected (or requested) language code
    pub language: String,

    /// Overall confidence scalar in [0, 1], replicated onto segments that
    /// carry no confidence of their own
    pub confidence: f64,

    pub segments: Vec<NewSegment>,

    pub speakers: Vec<NewSpeaker>,
}

impl TranscriptResult {
    /// Sort segments by start time and check the segment invariants.
    ///
    /// Engines generally emit sorted segments already; this is the
    /// pipeline's guarantee that they are persisted that way.
    pub fn normalized(mut self) -> Result<Self, EngineError> {
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(anyhow::anyhow!(
                "Engine confidence {} outside [0, 1]",
                self.confidence
            )
            .into());
        }

        self.segments.sort_by(|a, b| {
            a.start_time
                .partial_cmp(&b.start_time)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        for (i, segment) in self.segments.iter().enumerate() {
            if !segment.start_time.is_finite() || !segment.end_time.is_finite() {
                return Err(anyhow::anyhow!("Segment {} has non-finite timestamps", i).into());
            }
            if segment.end_time <= segment.start_time {
                return Err(anyhow::anyhow!(
                    "Segment {} ends at {} before it starts at {}",
                    i,
                    segment.end_time,
                    segment.start_time
                )
                .into());
            }
        }

        Ok(self)
    }
}

/// Trait for speech-to-text engines.
#[async_trait]
pub trait TranscriptionEngine: Send + Sync {
    /// Human-readable engine name
    fn name(&self) -> &str;

    /// Transcribe the audio behind a storage reference.
    async fn transcribe(
        &self,
        audio_ref: &str,
        language: &str,
    ) -> Result<TranscriptResult, EngineError>;
}
