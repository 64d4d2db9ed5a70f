//! Command-line interface for meetscribe.
//!
//! Provides commands for creating meetings, attaching recorded audio,
//! queueing transcriptions, and inspecting results. The transcription
//! commands build the full pipeline (store, queue, worker, engine) as a
//! local composition root.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};

use crate::config::{self, EngineKind, ResolvedConfig};
use crate::core::{JobQueue, Orchestrator, Worker};
use crate::domain::Meeting;
use crate::engine::{TranscriptionEngine, WhisperApiEngine, WhisperBinaryEngine};
use crate::notify::{LogNotifier, Notifier};
use crate::store::{MeetingUpdate, TranscriptStore};

/// meetscribe - Meeting transcription pipeline
#[derive(Parser, Debug)]
#[command(name = "meetscribe")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a meeting record
    New {
        /// Meeting title
        title: String,

        /// Owning user id
        #[arg(short, long, default_value = "local")]
        user: String,

        /// Platform tag (e.g. zoom, meet)
        #[arg(short, long)]
        platform: Option<String>,

        /// Meeting date (RFC 3339; defaults to now)
        #[arg(long)]
        date: Option<String>,
    },

    /// List meetings for a user
    List {
        /// User id to list meetings for
        #[arg(short, long, default_value = "local")]
        user: String,
    },

    /// Attach a recorded audio reference to a meeting
    AttachAudio {
        /// Meeting id
        meeting_id: String,

        /// Storage key of the audio, relative to the media directory
        audio_ref: String,

        /// Recording duration in seconds
        #[arg(short, long)]
        duration: Option<i64>,
    },

    /// Queue a transcription for a meeting and process it
    Transcribe {
        /// Meeting id
        meeting_id: String,

        /// Enqueue only; leave processing to a `work` run
        #[arg(long)]
        no_wait: bool,
    },

    /// Re-queue a failed transcription
    Retry {
        /// Meeting id
        meeting_id: String,

        /// Enqueue only; leave processing to a `work` run
        #[arg(long)]
        no_wait: bool,
    },

    /// Process journaled jobs until interrupted
    Work,

    /// Show a meeting's status
    Status {
        /// Meeting id
        meeting_id: String,
    },

    /// Show a meeting's transcript
    Show {
        /// Meeting id
        meeting_id: String,

        /// Include per-segment timing and confidence
        #[arg(short, long)]
        full: bool,
    },

    /// Show job queue status
    Queue,

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::New {
                title,
                user,
                platform,
                date,
            } => execute_new(title, user, platform, date),
            Commands::List { user } => execute_list(&user),
            Commands::AttachAudio {
                meeting_id,
                audio_ref,
                duration,
            } => execute_attach_audio(&meeting_id, audio_ref, duration),
            Commands::Transcribe {
                meeting_id,
                no_wait,
            } => execute_transcribe(&meeting_id, no_wait, false).await,
            Commands::Retry {
                meeting_id,
                no_wait,
            } => execute_transcribe(&meeting_id, no_wait, true).await,
            Commands::Work => execute_work().await,
            Commands::Status { meeting_id } => execute_status(&meeting_id),
            Commands::Show { meeting_id, full } => execute_show(&meeting_id, full),
            Commands::Queue => execute_queue().await,
            Commands::Config => execute_config(),
        }
    }
}

fn open_store() -> Result<Arc<TranscriptStore>> {
    let cfg = config::config()?;
    Ok(Arc::new(TranscriptStore::open(cfg.db_path())?))
}

fn build_engine(cfg: &ResolvedConfig) -> Arc<dyn TranscriptionEngine> {
    match cfg.engine.kind {
        EngineKind::WhisperBinary => Arc::new(WhisperBinaryEngine::new(
            &cfg.engine.whisper_path,
            &cfg.engine.model,
            &cfg.media_dir,
        )),
        EngineKind::WhisperApi => {
            let api_key = std::env::var(&cfg.engine.api_key_env).unwrap_or_default();
            Arc::new(WhisperApiEngine::new(
                &cfg.engine.api_url,
                api_key,
                &cfg.engine.model,
                &cfg.media_dir,
            ))
        }
    }
}

fn build_worker(cfg: &ResolvedConfig, store: Arc<TranscriptStore>) -> Worker {
    Worker::new(
        store,
        build_engine(cfg),
        Arc::new(LogNotifier) as Arc<dyn Notifier>,
        cfg.engine.language.clone(),
    )
}

fn execute_new(
    title: String,
    user: String,
    platform: Option<String>,
    date: Option<String>,
) -> Result<()> {
    let scheduled_at = match date {
        Some(date) => DateTime::parse_from_rfc3339(&date)
            .with_context(|| format!("Invalid meeting date: {}", date))?
            .with_timezone(&Utc),
        None => Utc::now(),
    };

    let store = open_store()?;
    let meeting = Meeting::new(user, title, scheduled_at, platform);
    store.create_meeting(&meeting)?;

    println!("Created meeting {}", meeting.id);
    println!("  Title:  {}", meeting.title);
    println!("  Status: {}", meeting.status);
    Ok(())
}

fn execute_list(user: &str) -> Result<()> {
    let store = open_store()?;
    let meetings = store.list_meetings(user)?;

    if meetings.is_empty() {
        println!("No meetings for user '{}'", user);
        return Ok(());
    }

    for meeting in meetings {
        println!(
            "{}  {:<10}  {}  {}",
            meeting.id,
            meeting.status,
            meeting.scheduled_at.format("%Y-%m-%d %H:%M"),
            meeting.title,
        );
    }
    Ok(())
}

fn execute_attach_audio(
    meeting_id: &str,
    audio_ref: String,
    duration: Option<i64>,
) -> Result<()> {
    let store = open_store()?;
    let meeting = store.update_meeting(
        meeting_id,
        &MeetingUpdate {
            audio_ref: Some(audio_ref),
            duration_seconds: duration,
            ..Default::default()
        },
    )?;

    println!(
        "Attached {} to meeting {}",
        meeting.audio_ref.as_deref().unwrap_or("?"),
        meeting.id
    );
    Ok(())
}

async fn execute_transcribe(meeting_id: &str, no_wait: bool, retry: bool) -> Result<()> {
    let cfg = config::config()?;
    let store = open_store()?;

    let (queue, runner) = JobQueue::open(cfg.queue_journal(), cfg.retry.clone()).await?;
    let orchestrator = Orchestrator::new(Arc::clone(&store), queue);

    let job_id = if retry {
        orchestrator.retry_transcription(meeting_id).await?
    } else {
        let meeting = store
            .get_meeting(meeting_id)?
            .with_context(|| format!("Meeting not found: {}", meeting_id))?;
        let audio_ref = meeting
            .audio_ref
            .clone()
            .context("Meeting has no attached audio; run attach-audio first")?;

        orchestrator
            .queue_transcription(meeting_id, &audio_ref, &meeting.user_id)
            .await?
    };

    println!("Queued transcription job {}", job_id);

    // Drop the producer side so the runner stops once the queue drains.
    drop(orchestrator);

    if no_wait {
        println!("Job journaled; run `meetscribe work` to process it");
        return Ok(());
    }

    let worker = build_worker(cfg, Arc::clone(&store));
    runner.run(worker).await;

    let meeting = store
        .get_meeting(meeting_id)?
        .with_context(|| format!("Meeting not found: {}", meeting_id))?;
    println!("Meeting {} is now {}", meeting_id, meeting.status);
    Ok(())
}

async fn execute_work() -> Result<()> {
    let cfg = config::config()?;
    let store = open_store()?;

    let (queue, runner) = JobQueue::open(cfg.queue_journal(), cfg.retry.clone()).await?;
    let status = queue.status().await?;
    println!(
        "Processing jobs ({} pending, {} in flight); ctrl-c to stop",
        status.pending, status.processing
    );

    let worker = build_worker(cfg, store);

    // Hold the queue handle so the loop keeps waiting for work.
    let run = runner.run(worker);
    tokio::select! {
        _ = run => {}
        _ = tokio::signal::ctrl_c() => {
            println!("\nStopping");
        }
    }

    drop(queue);
    Ok(())
}

fn execute_status(meeting_id: &str) -> Result<()> {
    let store = open_store()?;
    let meeting = store
        .get_meeting(meeting_id)?
        .with_context(|| format!("Meeting not found: {}", meeting_id))?;

    println!("Meeting:  {}", meeting.id);
    println!("Title:    {}", meeting.title);
    println!("Status:   {}", meeting.status);
    println!("Duration: {}s", meeting.duration_seconds);
    println!(
        "Audio:    {}",
        meeting.audio_ref.as_deref().unwrap_or("(none)")
    );
    Ok(())
}

fn execute_show(meeting_id: &str, full: bool) -> Result<()> {
    let store = open_store()?;
    let transcript = store
        .get_transcript(meeting_id)?
        .with_context(|| format!("No transcript for meeting: {}", meeting_id))?;

    println!("Transcript {}", transcript.id);
    println!(
        "Language: {}  Confidence: {:.2}",
        transcript.language, transcript.confidence
    );
    println!();
    println!("{}", transcript.text);

    if full {
        println!();
        for segment in &transcript.segments {
            let speaker = segment
                .speaker_id
                .as_ref()
                .and_then(|id| transcript.speakers.iter().find(|s| &s.id == id))
                .map(|s| s.display_name.clone().unwrap_or_else(|| s.label.clone()))
                .unwrap_or_else(|| "-".to_string());

            println!(
                "[{:>8.2} - {:>8.2}] {:.2} {:<12} {}",
                segment.start_time, segment.end_time, segment.confidence, speaker, segment.text
            );
        }
    }
    Ok(())
}

async fn execute_queue() -> Result<()> {
    let cfg = config::config()?;

    let (queue, _runner) = JobQueue::open(cfg.queue_journal(), cfg.retry.clone()).await?;
    let status = queue.status().await?;

    println!("Job queue ({})", cfg.queue_journal().display());
    println!("  Pending:    {}", status.pending);
    println!("  Processing: {}", status.processing);
    println!("  Failed:     {}", status.failed);
    println!("  Exhausted:  {}", status.exhausted);
    println!("  Total:      {}", status.total());
    Ok(())
}

fn execute_config() -> Result<()> {
    let cfg = config::config()?;

    println!("Home:      {}", cfg.home.display());
    println!("Media:     {}", cfg.media_dir.display());
    println!("Database:  {}", cfg.db_path().display());
    println!("Journal:   {}", cfg.queue_journal().display());
    match &cfg.config_file {
        Some(path) => println!("Config:    {}", path.display()),
        None => println!("Config:    (defaults)"),
    }
    println!(
        "Engine:    {:?} (model {}, language {})",
        cfg.engine.kind, cfg.engine.model, cfg.engine.language
    );
    println!(
        "Retries:   {} attempts, {}ms base delay, x{} backoff",
        cfg.retry.max_attempts, cfg.retry.initial_delay_ms, cfg.retry.backoff_multiplier
    );
    Ok(())
}
