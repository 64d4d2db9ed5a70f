//! Meeting aggregate and its processing lifecycle.
//!
//! A Meeting is created by the recording flow with status `Recording`.
//! From there the status is mutated by exactly two actors: the orchestrator
//! (-> `Processing` when a transcription is requested) and the worker
//! (`Processing` -> `Completed` | `Failed`).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A recorded meeting and its transcription lifecycle state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Meeting {
    /// Unique identifier
    pub id: String,

    /// Owning user
    pub user_id: String,

    /// Human-readable title
    pub title: String,

    /// When the meeting took place
    pub scheduled_at: DateTime<Utc>,

    /// Platform tag (e.g. "zoom", "meet")
    pub platform: Option<String>,

    /// Recording duration in seconds (0 until audio is attached)
    pub duration_seconds: i64,

    /// Current lifecycle status
    pub status: MeetingStatus,

    /// Storage key of the recorded audio, once uploaded
    pub audio_ref: Option<String>,
}

impl Meeting {
    /// Create a new meeting in the initial `Recording` state
    pub fn new(
        user_id: impl Into<String>,
        title: impl Into<String>,
        scheduled_at: DateTime<Utc>,
        platform: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            title: title.into(),
            scheduled_at,
            platform,
            duration_seconds: 0,
            status: MeetingStatus::Recording,
            audio_ref: None,
        }
    }
}

/// Meeting lifecycle status.
///
/// Valid transitions:
/// - any -> `Processing` (orchestrator on (re)submission; worker re-affirms
///   `Processing -> Processing` on redelivery)
/// - `Processing` -> `Completed` (worker, on committed persistence)
/// - `Processing` -> `Failed` (worker, on every failing attempt)
///
/// `Failed` is not terminal: a manual retry flips it back to `Processing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MeetingStatus {
    /// Initial state, set at meeting creation
    Recording,

    /// A transcription job is outstanding
    Processing,

    /// A transcript has been persisted
    Completed,

    /// The last transcription attempt failed (retryable)
    Failed,
}

impl MeetingStatus {
    /// Stable string form, used for storage and wire payloads
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Recording => "RECORDING",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    /// Whether `self -> to` is a legal transition
    pub fn can_transition(self, to: MeetingStatus) -> bool {
        match to {
            // Re-submission from any state, plus the worker's idempotent
            // re-affirmation while a redelivered job is in flight.
            Self::Processing => true,
            // Terminal-ish states are only reachable from Processing.
            Self::Completed | Self::Failed => self == Self::Processing,
            // Recording is set once, at creation.
            Self::Recording => false,
        }
    }
}

impl fmt::Display for MeetingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MeetingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RECORDING" => Ok(Self::Recording),
            "PROCESSING" => Ok(Self::Processing),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            other => Err(format!("Unknown meeting status: {}", other)),
        }
    }
}
