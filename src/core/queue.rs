//! Durable transcription job queue.
//!
//! Follows an append-only JSONL journal with state derived from replay:
//! a job is journaled before it is handed to the delivery loop, so an
//! enqueue that returned success survives a restart. The single delivery
//! loop owns the receiving end of the channel and drives the retry policy;
//! no two deliveries of the same job ever overlap. Successfully processed
//! jobs keep no bookkeeping record (the journal is compacted after
//! completion and again on reopen).

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::domain::TranscriptionJob;

/// Errors that can occur with the job queue.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("A transcription job for meeting {0} is already outstanding")]
    DuplicateJob(String),

    #[error("Invalid job record: {0}")]
    InvalidJob(String),

    #[error("Queue is not accepting jobs (delivery loop is gone)")]
    Closed,

    #[error("Queue journal is locked by another instance")]
    Locked,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Retry policy for failed jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including first try)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay between attempts in milliseconds
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Maximum delay between attempts in milliseconds
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Backoff multiplier (delay *= multiplier after each attempt)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_delay() -> u64 {
    5000
}
fn default_max_delay() -> u64 {
    30000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after a failed attempt (1-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::from_millis(self.initial_delay_ms);
        }

        let delay =
            self.initial_delay_ms as f64 * self.backoff_multiplier.powi((attempt - 1) as i32);

        let capped = delay.min(self.max_delay_ms as f64) as u64;
        Duration::from_millis(capped)
    }

    /// Whether another attempt is allowed after `attempt` failures
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// The single consumer registered with the queue.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Process one delivery of a job. Returning `Err` triggers the retry
    /// policy; returning `Ok` completes the job.
    async fn process(&self, job: &TranscriptionJob) -> anyhow::Result<()>;
}

#[async_trait]
impl<H: JobHandler + ?Sized> JobHandler for Arc<H> {
    async fn process(&self, job: &TranscriptionJob) -> anyhow::Result<()> {
        (**self).process(job).await
    }
}

/// Stable short id for a job (content hash of meeting + audio ref).
pub fn job_id_for(job: &TranscriptionJob) -> String {
    let mut hasher = Sha256::new();
    hasher.update(job.meeting_id.as_bytes());
    hasher.update(b":");
    hasher.update(job.audio_ref.as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..6])
}

/// An entry in the queue journal (append-only).
#[derive(Debug, Clone, Serialize, Deserialize)]
struct JournalEntry {
    timestamp: DateTime<Utc>,
    job_id: String,
    entry_type: EntryType,

    /// Full job record (Enqueued entries only)
    #[serde(skip_serializing_if = "Option::is_none")]
    job: Option<TranscriptionJob>,

    #[serde(skip_serializing_if = "Option::is_none")]
    attempt: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl JournalEntry {
    fn enqueued(job_id: &str, job: &TranscriptionJob) -> Self {
        Self {
            timestamp: Utc::now(),
            job_id: job_id.to_string(),
            entry_type: EntryType::Enqueued,
            job: Some(job.clone()),
            attempt: None,
            error: None,
        }
    }

    fn attempt_started(job_id: &str, attempt: u32) -> Self {
        Self {
            timestamp: Utc::now(),
            job_id: job_id.to_string(),
            entry_type: EntryType::AttemptStarted,
            job: None,
            attempt: Some(attempt),
            error: None,
        }
    }

    fn completed(job_id: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            job_id: job_id.to_string(),
            entry_type: EntryType::Completed,
            job: None,
            attempt: None,
            error: None,
        }
    }

    fn failed(job_id: &str, attempt: u32, error: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            job_id: job_id.to_string(),
            entry_type: EntryType::Failed,
            job: None,
            attempt: Some(attempt),
            error: Some(error.to_string()),
        }
    }

    fn exhausted(job_id: &str, attempt: u32) -> Self {
        Self {
            timestamp: Utc::now(),
            job_id: job_id.to_string(),
            entry_type: EntryType::Exhausted,
            job: None,
            attempt: Some(attempt),
            error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum EntryType {
    Enqueued,
    AttemptStarted,
    Completed,
    Failed,
    Exhausted,
}

/// Current status of a journaled job (derived from replay).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    /// Awaiting first delivery (or redelivery after a failed attempt)
    Pending,

    /// An attempt is in flight
    Processing,

    /// Last attempt failed; more attempts remain
    Failed,

    /// Processed successfully (record pending compaction)
    Completed,

    /// All attempts consumed; dropped
    Exhausted,
}

impl JobStatus {
    fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Exhausted)
    }
}

/// A job with its replay-derived state.
#[derive(Debug, Clone)]
pub struct JobState {
    pub job_id: String,
    pub job: TranscriptionJob,
    pub status: JobStatus,
    pub attempts: u32,
    pub enqueued_at: DateTime<Utc>,
    pub error: Option<String>,
}

/// Queue status summary.
#[derive(Debug, Clone, Default)]
pub struct QueueStatus {
    pub pending: usize,
    pub processing: usize,
    pub failed: usize,
    pub completed: usize,
    pub exhausted: usize,
}

impl QueueStatus {
    pub fn total(&self) -> usize {
        self.pending + self.processing + self.failed + self.completed + self.exhausted
    }
}

/// JSONL journal with all file IO serialized behind one async mutex, so a
/// compaction never races an append.
struct Journal {
    path: PathBuf,
    io: tokio::sync::Mutex<()>,
}

impl Journal {
    async fn append(&self, entry: &JournalEntry) -> Result<(), QueueError> {
        let _guard = self.io.lock().await;
        self.append_locked(entry).await
    }

    async fn append_locked(&self, entry: &JournalEntry) -> Result<(), QueueError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;

        let json = serde_json::to_string(entry)?;
        file.write_all(format!("{}\n", json).as_bytes()).await?;
        file.flush().await?;

        Ok(())
    }

    async fn replay(&self) -> Result<Vec<JournalEntry>, QueueError> {
        let _guard = self.io.lock().await;
        self.replay_locked().await
    }

    async fn replay_locked(&self) -> Result<Vec<JournalEntry>, QueueError> {
        let mut entries = Vec::new();

        if !self.path.exists() {
            return Ok(entries);
        }

        let file = File::open(&self.path).await?;
        let reader = BufReader::new(file);
        let mut lines = reader.lines();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let entry: JournalEntry = serde_json::from_str(&line)?;
            entries.push(entry);
        }

        Ok(entries)
    }

    /// Rewrite the journal keeping only the given jobs, each as a fresh
    /// Enqueued entry carrying its consumed attempt count.
    async fn rewrite_locked(&self, live: &[&JobState]) -> Result<(), QueueError> {
        let tmp_path = self.path.with_extension("jsonl.tmp");

        let mut file = File::create(&tmp_path).await?;
        for state in live {
            let mut job = state.job.clone();
            job.attempt = state.attempts;

            let mut entry = JournalEntry::enqueued(&state.job_id, &job);
            entry.timestamp = state.enqueued_at;

            let json = serde_json::to_string(&entry)?;
            file.write_all(format!("{}\n", json).as_bytes()).await?;
        }
        file.flush().await?;
        drop(file);

        fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }

    /// Drop terminal jobs from the journal (`remove_on_complete`).
    async fn compact(&self) -> Result<(), QueueError> {
        let _guard = self.io.lock().await;
        let entries = self.replay_locked().await?;
        let (states, order) = derive_states(&entries);

        let live: Vec<&JobState> = order
            .iter()
            .filter_map(|id| states.get(id))
            .filter(|s| !s.status.is_terminal())
            .collect();

        self.rewrite_locked(&live).await
    }
}

/// Replay journal entries into per-job state, preserving enqueue order.
fn derive_states(entries: &[JournalEntry]) -> (HashMap<String, JobState>, Vec<String>) {
    let mut states: HashMap<String, JobState> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    for entry in entries {
        match entry.entry_type {
            EntryType::Enqueued => {
                if let Some(job) = entry.job.clone() {
                    if !states.contains_key(&entry.job_id) {
                        order.push(entry.job_id.clone());
                    }
                    let attempts = job.attempt;
                    states.insert(
                        entry.job_id.clone(),
                        JobState {
                            job_id: entry.job_id.clone(),
                            job,
                            status: JobStatus::Pending,
                            attempts,
                            enqueued_at: entry.timestamp,
                            error: None,
                        },
                    );
                }
            }
            EntryType::AttemptStarted => {
                if let Some(state) = states.get_mut(&entry.job_id) {
                    state.status = JobStatus::Processing;
                    state.attempts = entry.attempt.unwrap_or(state.attempts + 1);
                }
            }
            EntryType::Completed => {
                if let Some(state) = states.get_mut(&entry.job_id) {
                    state.status = JobStatus::Completed;
                }
            }
            EntryType::Failed => {
                if let Some(state) = states.get_mut(&entry.job_id) {
                    state.status = JobStatus::Failed;
                    state.error = entry.error.clone();
                }
            }
            EntryType::Exhausted => {
                if let Some(state) = states.get_mut(&entry.job_id) {
                    state.status = JobStatus::Exhausted;
                }
            }
        }
    }

    (states, order)
}

/// State shared between the queue handle and the delivery loop.
struct QueueShared {
    journal: Journal,
    policy: RetryPolicy,

    /// Meetings with an outstanding job (dedup guard)
    outstanding: Mutex<HashSet<String>>,

    /// Exclusive journal lock, held for the lifetime of the queue
    _lock: std::fs::File,
}

impl QueueShared {
    fn clear_outstanding(&self, meeting_id: &str) {
        if let Ok(mut outstanding) = self.outstanding.lock() {
            outstanding.remove(meeting_id);
        }
    }
}

/// Producer handle: enqueue jobs, inspect status. Cheap to clone.
#[derive(Clone)]
pub struct JobQueue {
    shared: Arc<QueueShared>,
    tx: mpsc::UnboundedSender<TranscriptionJob>,
}

/// Consumer half: owns the receiving end of the delivery channel.
pub struct JobRunner {
    shared: Arc<QueueShared>,
    rx: mpsc::UnboundedReceiver<TranscriptionJob>,
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueue").finish_non_exhaustive()
    }
}

impl std::fmt::Debug for JobRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRunner").finish_non_exhaustive()
    }
}

impl JobQueue {
    /// Open a queue backed by the given journal file.
    ///
    /// Replays the journal, drops terminal records, and re-sends any
    /// non-terminal job to the delivery channel (at-least-once). Fails with
    /// `Locked` if another instance holds the journal.
    pub async fn open(
        journal_path: impl AsRef<Path>,
        policy: RetryPolicy,
    ) -> Result<(JobQueue, JobRunner), QueueError> {
        let path = journal_path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let lock_path = path.with_extension("lock");
        let lock_file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(&lock_path)?;
        lock_file
            .try_lock_exclusive()
            .map_err(|_| QueueError::Locked)?;

        let journal = Journal {
            path,
            io: tokio::sync::Mutex::new(()),
        };

        journal.compact().await?;
        let entries = journal.replay().await?;
        let (states, order) = derive_states(&entries);

        let (tx, rx) = mpsc::unbounded_channel();
        let mut outstanding = HashSet::new();

        for job_id in &order {
            let Some(state) = states.get(job_id) else {
                continue;
            };

            let mut job = state.job.clone();
            job.attempt = state.attempts;
            outstanding.insert(job.meeting_id.clone());

            // The receiver is still in scope; this cannot fail.
            let _ = tx.send(job);
            info!(%job_id, "Recovered pending job from journal");
        }

        let shared = Arc::new(QueueShared {
            journal,
            policy,
            outstanding: Mutex::new(outstanding),
            _lock: lock_file,
        });

        Ok((
            JobQueue {
                shared: Arc::clone(&shared),
                tx,
            },
            JobRunner { shared, rx },
        ))
    }

    /// Durably enqueue a job for delivery.
    ///
    /// Once this returns `Ok`, the job will eventually be delivered to the
    /// registered handler (or recovered from the journal after a restart).
    pub async fn enqueue(&self, job: TranscriptionJob) -> Result<String, QueueError> {
        job.validate().map_err(QueueError::InvalidJob)?;
        let job_id = job_id_for(&job);

        // Refuse before journaling; a job accepted durably must not be
        // reported as failed.
        if self.tx.is_closed() {
            return Err(QueueError::Closed);
        }

        {
            let mut outstanding = self
                .shared
                .outstanding
                .lock()
                .map_err(|_| QueueError::Closed)?;
            if !outstanding.insert(job.meeting_id.clone()) {
                return Err(QueueError::DuplicateJob(job.meeting_id.clone()));
            }
        }

        let entry = JournalEntry::enqueued(&job_id, &job);
        if let Err(e) = self.shared.journal.append(&entry).await {
            self.shared.clear_outstanding(&job.meeting_id);
            return Err(e);
        }

        let meeting_id = job.meeting_id.clone();
        if self.tx.send(job).is_err() {
            self.shared.clear_outstanding(&meeting_id);
            return Err(QueueError::Closed);
        }

        info!(%job_id, %meeting_id, "Transcription job enqueued");
        Ok(job_id)
    }

    /// Whether a job for the meeting is currently outstanding.
    pub fn is_outstanding(&self, meeting_id: &str) -> bool {
        self.shared
            .outstanding
            .lock()
            .map(|o| o.contains(meeting_id))
            .unwrap_or(false)
    }

    /// Summary of journaled job states.
    pub async fn status(&self) -> Result<QueueStatus, QueueError> {
        let entries = self.shared.journal.replay().await?;
        let (states, _) = derive_states(&entries);

        let mut status = QueueStatus::default();
        for state in states.values() {
            match state.status {
                JobStatus::Pending => status.pending += 1,
                JobStatus::Processing => status.processing += 1,
                JobStatus::Failed => status.failed += 1,
                JobStatus::Completed => status.completed += 1,
                JobStatus::Exhausted => status.exhausted += 1,
            }
        }

        Ok(status)
    }
}

impl JobRunner {
    /// Consume jobs until every producer handle is dropped and the channel
    /// drains. Jobs are processed one at a time, in delivery order.
    pub async fn run<H: JobHandler>(mut self, handler: H) {
        while let Some(job) = self.rx.recv().await {
            if let Err(e) = job.validate() {
                error!(error = %e, "Dropping invalid job record");
                self.shared.clear_outstanding(&job.meeting_id);
                continue;
            }
            self.deliver(&handler, job).await;
        }
    }

    /// Run one job through the retry policy until success or exhaustion.
    async fn deliver<H: JobHandler>(&self, handler: &H, mut job: TranscriptionJob) {
        let job_id = job_id_for(&job);
        let mut attempt = job.attempt;

        loop {
            attempt += 1;
            job.attempt = attempt;

            self.journal_note(JournalEntry::attempt_started(&job_id, attempt))
                .await;

            match handler.process(&job).await {
                Ok(()) => {
                    self.journal_note(JournalEntry::completed(&job_id)).await;

                    // Successful jobs carry no audit trail.
                    if let Err(e) = self.shared.journal.compact().await {
                        warn!(error = %e, "Journal compaction failed");
                    }

                    self.shared.clear_outstanding(&job.meeting_id);
                    info!(%job_id, attempt, "Job completed");
                    return;
                }
                Err(e) => {
                    self.journal_note(JournalEntry::failed(&job_id, attempt, &e.to_string()))
                        .await;

                    if self.shared.policy.should_retry(attempt) {
                        let delay = self.shared.policy.delay_for_attempt(attempt);
                        warn!(
                            %job_id,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Job attempt failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    self.journal_note(JournalEntry::exhausted(&job_id, attempt))
                        .await;
                    self.shared.clear_outstanding(&job.meeting_id);
                    error!(%job_id, attempt, error = %e, "Job failed permanently, dropping");
                    return;
                }
            }
        }
    }

    /// Attempt bookkeeping is best-effort; the enqueue append is the
    /// durable point.
    async fn journal_note(&self, entry: JournalEntry) {
        if let Err(e) = self.shared.journal.append(&entry).await {
            warn!(error = %e, "Failed to journal queue event");
        }
    }
}
