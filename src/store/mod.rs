//! Transactional persistence gateway for meetings and transcripts.
//!
//! Backed by an embedded SQLite database. The connection lives behind a
//! mutex and is never held across an await point; the multi-row transcript
//! write runs in a single transaction so a failed attempt leaves no rows
//! behind.

mod meetings;
pub mod migrations;
mod transcripts;

pub use meetings::MeetingUpdate;

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::Connection;
use thiserror::Error;

use crate::domain::MeetingStatus;

/// Errors surfaced by the store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Meeting not found: {0}")]
    MeetingNotFound(String),

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition {
        from: MeetingStatus,
        to: MeetingStatus,
    },

    #[error("Invalid segment: {0}")]
    InvalidSegment(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection lock poisoned")]
    Poisoned,
}

/// SQLite-backed store for the transcription pipeline.
pub struct TranscriptStore {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl TranscriptStore {
    /// Open (or create) the database at the given path and run migrations.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db_path = db_path.as_ref().to_path_buf();

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&db_path)?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        migrations::run_migrations(&conn)?;

        tracing::info!(path = %db_path.display(), "Database initialized");

        Ok(Self {
            conn: Mutex::new(conn),
            db_path,
        })
    }

    /// In-memory store, for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        migrations::run_migrations(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            db_path: PathBuf::from(":memory:"),
        })
    }

    /// Path of the backing database file.
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Run a closure with the locked connection.
    fn with_conn<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError>,
    {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        f(&conn)
    }
}
