//! The persisted transcript graph.
//!
//! A meeting has at most one transcript. A transcript owns an ordered set of
//! segments (ascending start time) and a set of speakers referenced by zero
//! or more segments.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A transcribed meeting, as read back from the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcript {
    pub id: String,

    /// Owning meeting
    pub meeting_id: String,

    /// Full transcript text
    pub text: String,

    /// Detected or declared language code (e.g. "en")
    pub language: String,

    /// Overall confidence score in [0, 1]
    pub confidence: f64,

    pub created_at: DateTime<Utc>,

    /// Segments in ascending start-time order
    pub segments: Vec<TranscriptSegment>,

    /// Speakers referenced by the segments
    pub speakers: Vec<Speaker>,
}

/// A time-aligned span of transcript text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub id: String,

    /// Speaker attribution, if diarization produced one
    pub speaker_id: Option<String>,

    /// Persisted write order (matches ascending start time)
    pub position: u32,

    pub text: String,

    /// Start offset in seconds
    pub start_time: f64,

    /// End offset in seconds (strictly greater than `start_time`)
    pub end_time: f64,

    /// Confidence score in [0, 1]
    pub confidence: f64,
}

/// A distinct voice identified in the recording.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Speaker {
    pub id: String,

    /// Identity label from the engine (e.g. "speaker_0")
    pub label: String,

    /// Human-assigned display name, if any
    pub display_name: Option<String>,
}

impl Transcript {
    /// Concatenated segment text, as a fallback when `text` is empty
    pub fn joined_segments(&self) -> String {
        let texts: Vec<&str> = self.segments.iter().map(|s| s.text.as_str()).collect();
        texts.join(" ")
    }
}

/// A segment as produced by a transcription engine, before persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSegment {
    pub text: String,

    /// Start offset in seconds
    pub start_time: f64,

    /// End offset in seconds
    pub end_time: f64,

    /// Per-segment confidence; `None` inherits the transcript scalar
    pub confidence: Option<f64>,

    /// Label of the speaker this segment is attributed to, if any
    pub speaker_label: Option<String>,
}

/// A speaker as produced by a transcription engine, before persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSpeaker {
    pub label: String,
    pub display_name: Option<String>,
}
