//! Best-effort user notification.
//!
//! The pipeline publishes named events to the owning user's live
//! subscribers. Delivery is fire-and-forget: call sites log a failed
//! publish and move on, and a user with no live subscribers simply misses
//! the event.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::info;

use crate::domain::MeetingStatus;

/// An event addressed to a single user.
#[derive(Debug, Clone, PartialEq)]
pub enum UserEvent {
    /// A transcription attempt has started
    Progress { meeting_id: String },

    /// A transcript was persisted
    Completed {
        meeting_id: String,
        transcript_id: String,
    },

    /// A transcription attempt failed
    Failed { meeting_id: String, error: String },
}

impl UserEvent {
    /// Wire event name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Progress { .. } => "transcription:progress",
            Self::Completed { .. } => "transcription:completed",
            Self::Failed { .. } => "transcription:failed",
        }
    }

    /// Wire payload (camelCase keys)
    pub fn payload(&self) -> Value {
        match self {
            Self::Progress { meeting_id } => json!({
                "meetingId": meeting_id,
                "status": MeetingStatus::Processing.as_str(),
            }),
            Self::Completed {
                meeting_id,
                transcript_id,
            } => json!({
                "meetingId": meeting_id,
                "transcriptId": transcript_id,
            }),
            Self::Failed { meeting_id, error } => json!({
                "meetingId": meeting_id,
                "error": error,
            }),
        }
    }
}

/// Abstract publish capability toward a user's live subscribers.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn publish(&self, user_id: &str, event: &UserEvent) -> anyhow::Result<()>;
}

/// A delivered event, as seen by a subscriber.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub event: String,
    pub payload: Value,
}

/// In-process notifier with one broadcast channel per user, standing in
/// for per-user socket rooms.
pub struct BroadcastNotifier {
    channels: Mutex<HashMap<String, broadcast::Sender<Delivery>>>,
    capacity: usize,
}

impl BroadcastNotifier {
    pub fn new() -> Self {
        Self::with_capacity(64)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    /// Subscribe to a user's events. Creates the user's channel if needed.
    pub fn subscribe(&self, user_id: &str) -> broadcast::Receiver<Delivery> {
        let mut channels = self
            .channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        channels
            .entry(user_id.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Notifier for BroadcastNotifier {
    async fn publish(&self, user_id: &str, event: &UserEvent) -> anyhow::Result<()> {
        let sender = {
            let channels = self
                .channels
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            channels.get(user_id).cloned()
        };

        if let Some(sender) = sender {
            // A send error only means no live receivers; that is fine.
            let _ = sender.send(Delivery {
                event: event.name().to_string(),
                payload: event.payload(),
            });
        }

        Ok(())
    }
}

/// Notifier that only writes structured log lines, for headless runs.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn publish(&self, user_id: &str, event: &UserEvent) -> anyhow::Result<()> {
        info!(
            user_id,
            event = event.name(),
            payload = %event.payload(),
            "User event"
        );
        Ok(())
    }
}
