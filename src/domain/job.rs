//! The job record carried across the queue boundary.
//!
//! Jobs are tagged with an explicit record version and validated on both
//! sides of the queue, so a journal written by one build is never trusted
//! blindly by another.

use serde::{Deserialize, Serialize};

/// Current job record version. Bump when the shape changes.
pub const JOB_RECORD_VERSION: u32 = 1;

/// A unit of work: "transcribe this meeting's audio".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptionJob {
    /// Record version, checked at enqueue and dequeue
    pub version: u32,

    /// Meeting to transcribe
    pub meeting_id: String,

    /// Storage key of the recorded audio
    pub audio_ref: String,

    /// Owning user, target of progress notifications
    pub user_id: String,

    /// Attempts already consumed (0 for a fresh submission)
    #[serde(default)]
    pub attempt: u32,
}

impl TranscriptionJob {
    /// Create a fresh job record
    pub fn new(
        meeting_id: impl Into<String>,
        audio_ref: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            version: JOB_RECORD_VERSION,
            meeting_id: meeting_id.into(),
            audio_ref: audio_ref.into(),
            user_id: user_id.into(),
            attempt: 0,
        }
    }

    /// Validate the record. Called at enqueue and again at dequeue.
    pub fn validate(&self) -> Result<(), String> {
        if self.version != JOB_RECORD_VERSION {
            return Err(format!(
                "Unsupported job record version {} (expected {})",
                self.version, JOB_RECORD_VERSION
            ));
        }
        if self.meeting_id.trim().is_empty() {
            return Err("Job is missing a meeting id".to_string());
        }
        if self.audio_ref.trim().is_empty() {
            return Err("Job is missing an audio reference".to_string());
        }
        if self.user_id.trim().is_empty() {
            return Err("Job is missing a user id".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_job_is_valid() {
        let job = TranscriptionJob::new("m1", "audio/m1.wav", "u1");
        assert_eq!(job.version, JOB_RECORD_VERSION);
        assert_eq!(job.attempt, 0);
        assert!(job.validate().is_ok());
    }

    #[test]
    fn test_rejects_blank_fields() {
        let mut job = TranscriptionJob::new("m1", "audio/m1.wav", "u1");
        job.audio_ref = "  ".to_string();
        assert!(job.validate().is_err());

        let mut job = TranscriptionJob::new("", "audio/m1.wav", "u1");
        job.meeting_id = String::new();
        assert!(job.validate().is_err());
    }

    #[test]
    fn test_rejects_unknown_version() {
        let mut job = TranscriptionJob::new("m1", "audio/m1.wav", "u1");
        job.version = 99;
        assert!(job.validate().is_err());
    }

    #[test]
    fn test_attempt_defaults_on_deserialize() {
        let json = r#"{"version":1,"meeting_id":"m1","audio_ref":"a.wav","user_id":"u1"}"#;
        let job: TranscriptionJob = serde_json::from_str(json).unwrap();
        assert_eq!(job.attempt, 0);
    }
}
