//! End-to-end pipeline tests.
//!
//! Exercise the full path (orchestrator -> queue -> worker -> store ->
//! notifier) with a scripted in-test engine standing in for speech-to-text.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tempfile::TempDir;

use meetscribe::core::{JobQueue, JobRunner, Orchestrator, RetryPolicy, Worker};
use meetscribe::domain::{Meeting, MeetingStatus, NewSegment};
use meetscribe::engine::{EngineError, TranscriptResult, TranscriptionEngine};
use meetscribe::notify::{BroadcastNotifier, Delivery, Notifier};
use meetscribe::store::TranscriptStore;

/// Engine that fails a scripted number of times, then succeeds with a
/// fixed two-segment result.
struct ScriptedEngine {
    calls: AtomicU32,
    failures: u32,
}

impl ScriptedEngine {
    fn succeeding() -> Self {
        Self {
            calls: AtomicU32::new(0),
            failures: 0,
        }
    }

    fn failing_first(failures: u32) -> Self {
        Self {
            calls: AtomicU32::new(0),
            failures,
        }
    }

    fn always_failing() -> Self {
        Self::failing_first(u32::MAX)
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TranscriptionEngine for ScriptedEngine {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn transcribe(
        &self,
        _audio_ref: &str,
        language: &str,
    ) -> Result<TranscriptResult, EngineError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(anyhow::anyhow!("speech backend unavailable").into());
        }

        Ok(TranscriptResult {
            text: "hello world".to_string(),
            language: language.to_string(),
            confidence: 0.95,
            segments: vec![
                NewSegment {
                    text: "hello".to_string(),
                    start_time: 0.0,
                    end_time: 1.0,
                    confidence: None,
                    speaker_label: None,
                },
                NewSegment {
                    text: "world".to_string(),
                    start_time: 1.0,
                    end_time: 2.0,
                    confidence: None,
                    speaker_label: None,
                },
            ],
            speakers: Vec::new(),
        })
    }
}

fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_delay_ms: 1,
        max_delay_ms: 10,
        backoff_multiplier: 2.0,
    }
}

async fn open_pipeline(
    temp: &TempDir,
    store: &Arc<TranscriptStore>,
) -> (Orchestrator, JobRunner) {
    let (queue, runner) = JobQueue::open(temp.path().join("jobs.jsonl"), fast_policy())
        .await
        .unwrap();
    (Orchestrator::new(Arc::clone(store), queue), runner)
}

fn meeting_with_audio(store: &TranscriptStore) -> Meeting {
    let mut meeting = Meeting::new("u1", "Planning", Utc::now(), Some("zoom".to_string()));
    meeting.audio_ref = Some("audio/m1.wav".to_string());
    store.create_meeting(&meeting).unwrap();
    meeting
}

fn drain(rx: &mut tokio::sync::broadcast::Receiver<Delivery>) -> Vec<Delivery> {
    let mut deliveries = Vec::new();
    while let Ok(delivery) = rx.try_recv() {
        deliveries.push(delivery);
    }
    deliveries
}

fn worker_with(
    store: &Arc<TranscriptStore>,
    engine: Arc<ScriptedEngine>,
    notifier: &Arc<BroadcastNotifier>,
) -> Worker {
    Worker::new(
        Arc::clone(store),
        engine,
        Arc::clone(notifier) as Arc<dyn Notifier>,
        "en",
    )
}

#[tokio::test]
async fn test_successful_transcription_end_to_end() {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(TranscriptStore::open_in_memory().unwrap());
    let notifier = Arc::new(BroadcastNotifier::new());
    let mut rx = notifier.subscribe("u1");

    let meeting = meeting_with_audio(&store);
    let (orchestrator, runner) = open_pipeline(&temp, &store).await;

    orchestrator
        .queue_transcription(&meeting.id, "audio/m1.wav", "u1")
        .await
        .unwrap();

    // Status flips before any worker runs
    assert_eq!(
        store.get_meeting(&meeting.id).unwrap().unwrap().status,
        MeetingStatus::Processing
    );

    let engine = Arc::new(ScriptedEngine::succeeding());
    let worker = worker_with(&store, Arc::clone(&engine), &notifier);
    drop(orchestrator);
    runner.run(worker).await;

    // Meeting completed, exactly one transcript with ordered segments
    let loaded = store.get_meeting(&meeting.id).unwrap().unwrap();
    assert_eq!(loaded.status, MeetingStatus::Completed);

    let transcript = store.get_transcript(&meeting.id).unwrap().unwrap();
    assert_eq!(transcript.text, "hello world");
    assert_eq!(transcript.language, "en");
    assert_eq!(transcript.segments.len(), 2);
    assert_eq!(transcript.segments[0].text, "hello");
    assert_eq!(transcript.segments[1].text, "world");
    assert!(transcript.segments[0].start_time <= transcript.segments[1].start_time);
    assert_eq!(engine.calls(), 1);

    // Events: PROCESSING then COMPLETED, with the persisted transcript id
    let deliveries = drain(&mut rx);
    let names: Vec<&str> = deliveries.iter().map(|d| d.event.as_str()).collect();
    assert_eq!(
        names,
        vec!["transcription:progress", "transcription:completed"]
    );
    assert_eq!(deliveries[0].payload["status"], "PROCESSING");
    assert_eq!(deliveries[1].payload["transcriptId"], transcript.id.as_str());
}

#[tokio::test]
async fn test_all_attempts_fail() {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(TranscriptStore::open_in_memory().unwrap());
    let notifier = Arc::new(BroadcastNotifier::new());
    let mut rx = notifier.subscribe("u1");

    let meeting = meeting_with_audio(&store);
    let (orchestrator, runner) = open_pipeline(&temp, &store).await;

    orchestrator
        .queue_transcription(&meeting.id, "audio/m1.wav", "u1")
        .await
        .unwrap();

    let engine = Arc::new(ScriptedEngine::always_failing());
    let worker = worker_with(&store, Arc::clone(&engine), &notifier);
    drop(orchestrator);
    runner.run(worker).await;

    // Terminal FAILED, no transcript rows
    let loaded = store.get_meeting(&meeting.id).unwrap().unwrap();
    assert_eq!(loaded.status, MeetingStatus::Failed);
    assert!(store.get_transcript(&meeting.id).unwrap().is_none());
    assert_eq!(engine.calls(), 3);

    // One failed event per attempt, each preceded by a progress event
    let deliveries = drain(&mut rx);
    let failed = deliveries
        .iter()
        .filter(|d| d.event == "transcription:failed")
        .count();
    let progress = deliveries
        .iter()
        .filter(|d| d.event == "transcription:progress")
        .count();
    assert_eq!(failed, 3);
    assert_eq!(progress, 3);
    assert_eq!(deliveries.len(), 6);
}

#[tokio::test]
async fn test_transient_failure_recovers_within_attempts() {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(TranscriptStore::open_in_memory().unwrap());
    let notifier = Arc::new(BroadcastNotifier::new());
    let mut rx = notifier.subscribe("u1");

    let meeting = meeting_with_audio(&store);
    let (orchestrator, runner) = open_pipeline(&temp, &store).await;

    orchestrator
        .queue_transcription(&meeting.id, "audio/m1.wav", "u1")
        .await
        .unwrap();

    let engine = Arc::new(ScriptedEngine::failing_first(1));
    let worker = worker_with(&store, Arc::clone(&engine), &notifier);
    drop(orchestrator);
    runner.run(worker).await;

    let loaded = store.get_meeting(&meeting.id).unwrap().unwrap();
    assert_eq!(loaded.status, MeetingStatus::Completed);
    assert_eq!(engine.calls(), 2);

    let deliveries = drain(&mut rx);
    let names: Vec<&str> = deliveries.iter().map(|d| d.event.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "transcription:progress",
            "transcription:failed",
            "transcription:progress",
            "transcription:completed",
        ]
    );
}

#[tokio::test]
async fn test_manual_retry_after_exhaustion() {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(TranscriptStore::open_in_memory().unwrap());
    let notifier = Arc::new(BroadcastNotifier::new());

    let meeting = meeting_with_audio(&store);

    // First submission exhausts all attempts
    {
        let (orchestrator, runner) = open_pipeline(&temp, &store).await;
        orchestrator
            .queue_transcription(&meeting.id, "audio/m1.wav", "u1")
            .await
            .unwrap();

        let worker = worker_with(&store, Arc::new(ScriptedEngine::always_failing()), &notifier);
        drop(orchestrator);
        runner.run(worker).await;
    }

    assert_eq!(
        store.get_meeting(&meeting.id).unwrap().unwrap().status,
        MeetingStatus::Failed
    );

    // Manual retry follows the same contract as a fresh submission
    let (orchestrator, runner) = open_pipeline(&temp, &store).await;
    orchestrator.retry_transcription(&meeting.id).await.unwrap();

    assert_eq!(
        store.get_meeting(&meeting.id).unwrap().unwrap().status,
        MeetingStatus::Processing
    );

    let worker = worker_with(&store, Arc::new(ScriptedEngine::succeeding()), &notifier);
    drop(orchestrator);
    runner.run(worker).await;

    let loaded = store.get_meeting(&meeting.id).unwrap().unwrap();
    assert_eq!(loaded.status, MeetingStatus::Completed);

    let transcript = store.get_transcript(&meeting.id).unwrap().unwrap();
    assert_eq!(transcript.segments.len(), 2);
}

#[tokio::test]
async fn test_meetings_process_independently() {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(TranscriptStore::open_in_memory().unwrap());
    let notifier = Arc::new(BroadcastNotifier::new());

    let first = meeting_with_audio(&store);
    let mut second = Meeting::new("u1", "Retro", Utc::now(), None);
    second.audio_ref = Some("audio/m2.wav".to_string());
    store.create_meeting(&second).unwrap();

    let (orchestrator, runner) = open_pipeline(&temp, &store).await;
    orchestrator
        .queue_transcription(&first.id, "audio/m1.wav", "u1")
        .await
        .unwrap();
    orchestrator
        .queue_transcription(&second.id, "audio/m2.wav", "u1")
        .await
        .unwrap();

    let worker = worker_with(&store, Arc::new(ScriptedEngine::succeeding()), &notifier);
    drop(orchestrator);
    runner.run(worker).await;

    for id in [&first.id, &second.id] {
        assert_eq!(
            store.get_meeting(id).unwrap().unwrap().status,
            MeetingStatus::Completed
        );
        assert!(store.get_transcript(id).unwrap().is_some());
    }
}
