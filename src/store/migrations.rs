//! Schema migrations.
//!
//! Versioned via SQLite's `user_version` pragma; each migration is applied
//! at most once, in order.

use rusqlite::Connection;

use super::StoreError;

/// Current schema version.
const SCHEMA_VERSION: i32 = 1;

/// Bring the database schema up to date.
pub fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
    let current: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

    if current < 1 {
        migrate_v1(conn)?;
    }

    if current < SCHEMA_VERSION {
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    }

    Ok(())
}

/// Initial schema: meetings, transcripts, speakers, segments.
fn migrate_v1(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS meetings (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            title TEXT NOT NULL,
            scheduled_at TEXT NOT NULL,
            platform TEXT,
            duration_seconds INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL,
            audio_ref TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_meetings_user
            ON meetings(user_id, scheduled_at);

        CREATE TABLE IF NOT EXISTS transcripts (
            id TEXT PRIMARY KEY,
            meeting_id TEXT NOT NULL UNIQUE
                REFERENCES meetings(id) ON DELETE CASCADE,
            text TEXT NOT NULL,
            language TEXT NOT NULL,
            confidence REAL NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS speakers (
            id TEXT PRIMARY KEY,
            transcript_id TEXT NOT NULL
                REFERENCES transcripts(id) ON DELETE CASCADE,
            label TEXT NOT NULL,
            display_name TEXT
        );

        CREATE TABLE IF NOT EXISTS transcript_segments (
            id TEXT PRIMARY KEY,
            transcript_id TEXT NOT NULL
                REFERENCES transcripts(id) ON DELETE CASCADE,
            speaker_id TEXT REFERENCES speakers(id),
            position INTEGER NOT NULL,
            text TEXT NOT NULL,
            start_time REAL NOT NULL,
            end_time REAL NOT NULL,
            confidence REAL NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_segments_transcript
            ON transcript_segments(transcript_id, start_time);
        "#,
    )?;

    Ok(())
}
