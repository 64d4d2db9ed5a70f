//! Job queue integration tests: delivery order, backoff pacing, and
//! journal recovery semantics.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use tempfile::TempDir;

use meetscribe::core::{JobHandler, JobQueue, RetryPolicy};
use meetscribe::domain::TranscriptionJob;

struct RecordingHandler {
    seen: Mutex<Vec<String>>,
    fail: bool,
    calls: AtomicU32,
}

impl RecordingHandler {
    fn new(fail: bool) -> Self {
        Self {
            seen: Mutex::new(Vec::new()),
            fail,
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl JobHandler for RecordingHandler {
    async fn process(&self, job: &TranscriptionJob) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(job.meeting_id.clone());
        if self.fail {
            anyhow::bail!("scripted failure");
        }
        Ok(())
    }
}

fn policy(initial_delay_ms: u64) -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_delay_ms,
        max_delay_ms: initial_delay_ms * 8,
        backoff_multiplier: 2.0,
    }
}

#[tokio::test]
async fn test_jobs_delivered_in_submission_order() {
    let temp = TempDir::new().unwrap();
    let (queue, runner) = JobQueue::open(temp.path().join("jobs.jsonl"), policy(1))
        .await
        .unwrap();

    for i in 0..5 {
        queue
            .enqueue(TranscriptionJob::new(
                format!("m{}", i),
                format!("audio/m{}.wav", i),
                "u1",
            ))
            .await
            .unwrap();
    }

    let handler = Arc::new(RecordingHandler::new(false));
    drop(queue);
    runner.run(Arc::clone(&handler)).await;

    let seen = handler.seen.lock().unwrap().clone();
    assert_eq!(seen, vec!["m0", "m1", "m2", "m3", "m4"]);
}

#[tokio::test]
async fn test_backoff_paces_retries() {
    let temp = TempDir::new().unwrap();

    // 50ms base delay, doubling: failed attempts wait 50ms then 100ms
    let (queue, runner) = JobQueue::open(temp.path().join("jobs.jsonl"), policy(50))
        .await
        .unwrap();

    queue
        .enqueue(TranscriptionJob::new("m1", "audio/m1.wav", "u1"))
        .await
        .unwrap();

    let handler = Arc::new(RecordingHandler::new(true));
    drop(queue);

    let started = Instant::now();
    runner.run(Arc::clone(&handler)).await;
    let elapsed = started.elapsed();

    assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
    // Two inter-attempt delays: 50ms + 100ms, with generous upper slack
    assert!(elapsed.as_millis() >= 150, "elapsed {:?}", elapsed);
    assert!(elapsed.as_millis() < 2000, "elapsed {:?}", elapsed);
}

#[tokio::test]
async fn test_recovery_preserves_consumed_attempts() {
    let temp = TempDir::new().unwrap();
    let journal_path = temp.path().join("jobs.jsonl");

    // A journal left behind by a run that consumed 2 of 3 attempts
    let mut job = TranscriptionJob::new("m1", "audio/m1.wav", "u1");
    job.attempt = 2;
    let entry = serde_json::json!({
        "timestamp": "2026-08-01T10:00:00Z",
        "job_id": "abcdefabcdef",
        "entry_type": "enqueued",
        "job": job,
    });
    std::fs::write(&journal_path, format!("{}\n", entry)).unwrap();

    let (queue, runner) = JobQueue::open(&journal_path, policy(1)).await.unwrap();
    assert!(queue.is_outstanding("m1"));

    let handler = Arc::new(RecordingHandler::new(true));
    drop(queue);
    runner.run(Arc::clone(&handler)).await;

    // Only the one remaining attempt ran before exhaustion
    assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_exhaustion_frees_the_meeting_for_resubmission() {
    let temp = TempDir::new().unwrap();
    let (queue, runner) = JobQueue::open(temp.path().join("jobs.jsonl"), policy(1))
        .await
        .unwrap();

    queue
        .enqueue(TranscriptionJob::new("m1", "audio/m1.wav", "u1"))
        .await
        .unwrap();

    let resubmit_queue = queue.clone();
    drop(queue);
    runner.run(RecordingHandler::new(true)).await;

    // The dedup guard cleared on exhaustion; a fresh submission is accepted
    assert!(!resubmit_queue.is_outstanding("m1"));
    let err = resubmit_queue
        .enqueue(TranscriptionJob::new("m1", "audio/m1.wav", "u1"))
        .await;
    // Delivery loop is gone, so the send fails, but not with DuplicateJob
    assert!(matches!(
        err,
        Err(meetscribe::core::QueueError::Closed)
    ));
}
