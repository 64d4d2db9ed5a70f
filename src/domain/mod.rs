//! Data structures for the transcription pipeline.
//!
//! - `meeting`: the Meeting aggregate and its status state machine
//! - `transcript`: the persisted transcript graph (transcript, segments, speakers)
//! - `job`: the versioned job record carried across the queue boundary

pub mod job;
pub mod meeting;
pub mod transcript;

pub use job::{TranscriptionJob, JOB_RECORD_VERSION};
pub use meeting::{Meeting, MeetingStatus};
pub use transcript::{NewSegment, NewSpeaker, Speaker, Transcript, TranscriptSegment};
