//! Meeting CRUD and the guarded status transition.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

use crate::domain::{Meeting, MeetingStatus};

use super::{StoreError, TranscriptStore};

/// Patch-style meeting update; `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct MeetingUpdate {
    pub title: Option<String>,
    pub duration_seconds: Option<i64>,
    pub audio_ref: Option<String>,
}

impl TranscriptStore {
    /// Insert a new meeting row.
    pub fn create_meeting(&self, meeting: &Meeting) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                r#"
                INSERT INTO meetings (
                    id, user_id, title, scheduled_at, platform,
                    duration_seconds, status, audio_ref
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
                params![
                    meeting.id,
                    meeting.user_id,
                    meeting.title,
                    meeting.scheduled_at.to_rfc3339(),
                    meeting.platform,
                    meeting.duration_seconds,
                    meeting.status.as_str(),
                    meeting.audio_ref,
                ],
            )?;
            Ok(())
        })
    }

    /// Fetch a meeting by id.
    pub fn get_meeting(&self, meeting_id: &str) -> Result<Option<Meeting>, StoreError> {
        self.with_conn(|conn| get_meeting_impl(conn, meeting_id))
    }

    /// All meetings for a user, most recent first.
    pub fn list_meetings(&self, user_id: &str) -> Result<Vec<Meeting>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT id, user_id, title, scheduled_at, platform,
                       duration_seconds, status, audio_ref
                FROM meetings
                WHERE user_id = ?1
                ORDER BY scheduled_at DESC
                "#,
            )?;

            let rows = stmt.query_map(params![user_id], row_to_meeting)?;
            let meetings = rows.collect::<Result<Vec<_>, _>>()?;
            Ok(meetings)
        })
    }

    /// Apply a patch update (title, duration, audio reference).
    pub fn update_meeting(
        &self,
        meeting_id: &str,
        update: &MeetingUpdate,
    ) -> Result<Meeting, StoreError> {
        self.with_conn(|conn| {
            let mut meeting = get_meeting_impl(conn, meeting_id)?
                .ok_or_else(|| StoreError::MeetingNotFound(meeting_id.to_string()))?;

            if let Some(ref title) = update.title {
                meeting.title = title.clone();
            }
            if let Some(duration) = update.duration_seconds {
                meeting.duration_seconds = duration;
            }
            if let Some(ref audio_ref) = update.audio_ref {
                meeting.audio_ref = Some(audio_ref.clone());
            }

            conn.execute(
                r#"
                UPDATE meetings
                SET title = ?2, duration_seconds = ?3, audio_ref = ?4
                WHERE id = ?1
                "#,
                params![
                    meeting.id,
                    meeting.title,
                    meeting.duration_seconds,
                    meeting.audio_ref,
                ],
            )?;

            Ok(meeting)
        })
    }

    /// Delete a meeting and (via cascade) its transcript graph.
    pub fn delete_meeting(&self, meeting_id: &str) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            let deleted = conn.execute("DELETE FROM meetings WHERE id = ?1", params![meeting_id])?;
            if deleted == 0 {
                return Err(StoreError::MeetingNotFound(meeting_id.to_string()));
            }
            Ok(())
        })
    }

    /// Transition a meeting's status, enforcing the state machine.
    pub fn set_meeting_status(
        &self,
        meeting_id: &str,
        to: MeetingStatus,
    ) -> Result<(), StoreError> {
        self.with_conn(|conn| set_meeting_status_impl(conn, meeting_id, to))
    }
}

pub(super) fn get_meeting_impl(
    conn: &Connection,
    meeting_id: &str,
) -> Result<Option<Meeting>, StoreError> {
    let mut stmt = conn.prepare(
        r#"
        SELECT id, user_id, title, scheduled_at, platform,
               duration_seconds, status, audio_ref
        FROM meetings
        WHERE id = ?1
        "#,
    )?;

    let mut rows = stmt.query_map(params![meeting_id], row_to_meeting)?;
    match rows.next() {
        Some(row) => Ok(Some(row?)),
        None => Ok(None),
    }
}

pub(super) fn set_meeting_status_impl(
    conn: &Connection,
    meeting_id: &str,
    to: MeetingStatus,
) -> Result<(), StoreError> {
    let meeting = get_meeting_impl(conn, meeting_id)?
        .ok_or_else(|| StoreError::MeetingNotFound(meeting_id.to_string()))?;

    if !meeting.status.can_transition(to) {
        return Err(StoreError::InvalidTransition {
            from: meeting.status,
            to,
        });
    }

    conn.execute(
        "UPDATE meetings SET status = ?2 WHERE id = ?1",
        params![meeting_id, to.as_str()],
    )?;

    Ok(())
}

fn row_to_meeting(row: &Row<'_>) -> rusqlite::Result<Meeting> {
    let scheduled_at: String = row.get(3)?;
    let status: String = row.get(6)?;

    Ok(Meeting {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        scheduled_at: parse_timestamp(3, &scheduled_at)?,
        platform: row.get(4)?,
        duration_seconds: row.get(5)?,
        status: parse_status(6, &status)?,
        audio_ref: row.get(7)?,
    })
}

pub(super) fn parse_timestamp(column: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                column,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}

fn parse_status(column: usize, value: &str) -> rusqlite::Result<MeetingStatus> {
    value.parse::<MeetingStatus>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            column,
            rusqlite::types::Type::Text,
            Box::<dyn std::error::Error + Send + Sync>::from(e),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn store_with_meeting() -> (TranscriptStore, Meeting) {
        let store = TranscriptStore::open_in_memory().unwrap();
        let meeting = Meeting::new("u1", "Weekly sync", Utc::now(), Some("meet".to_string()));
        store.create_meeting(&meeting).unwrap();
        (store, meeting)
    }

    #[test]
    fn test_create_and_get() {
        let (store, meeting) = store_with_meeting();

        let loaded = store.get_meeting(&meeting.id).unwrap().unwrap();
        assert_eq!(loaded.title, "Weekly sync");
        assert_eq!(loaded.status, MeetingStatus::Recording);
        assert_eq!(loaded.platform.as_deref(), Some("meet"));
    }

    #[test]
    fn test_get_missing_returns_none() {
        let store = TranscriptStore::open_in_memory().unwrap();
        assert!(store.get_meeting("nope").unwrap().is_none());
    }

    #[test]
    fn test_update_patches_fields() {
        let (store, meeting) = store_with_meeting();

        let updated = store
            .update_meeting(
                &meeting.id,
                &MeetingUpdate {
                    audio_ref: Some("audio/m1.wav".to_string()),
                    duration_seconds: Some(1800),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(updated.audio_ref.as_deref(), Some("audio/m1.wav"));
        assert_eq!(updated.duration_seconds, 1800);
        // Untouched field survives
        assert_eq!(updated.title, "Weekly sync");
    }

    #[test]
    fn test_status_transition_guard() {
        let (store, meeting) = store_with_meeting();

        // Recording -> Completed is not legal
        let err = store
            .set_meeting_status(&meeting.id, MeetingStatus::Completed)
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));

        // Recording -> Processing -> Failed -> Processing is
        store
            .set_meeting_status(&meeting.id, MeetingStatus::Processing)
            .unwrap();
        store
            .set_meeting_status(&meeting.id, MeetingStatus::Failed)
            .unwrap();
        store
            .set_meeting_status(&meeting.id, MeetingStatus::Processing)
            .unwrap();

        let loaded = store.get_meeting(&meeting.id).unwrap().unwrap();
        assert_eq!(loaded.status, MeetingStatus::Processing);
    }

    #[test]
    fn test_list_orders_by_date_desc() {
        let store = TranscriptStore::open_in_memory().unwrap();

        let older = Meeting::new(
            "u1",
            "Older",
            Utc::now() - chrono::Duration::days(2),
            None,
        );
        let newer = Meeting::new("u1", "Newer", Utc::now(), None);
        store.create_meeting(&older).unwrap();
        store.create_meeting(&newer).unwrap();

        let meetings = store.list_meetings("u1").unwrap();
        assert_eq!(meetings.len(), 2);
        assert_eq!(meetings[0].title, "Newer");

        assert!(store.list_meetings("other-user").unwrap().is_empty());
    }

    #[test]
    fn test_delete() {
        let (store, meeting) = store_with_meeting();
        store.delete_meeting(&meeting.id).unwrap();
        assert!(store.get_meeting(&meeting.id).unwrap().is_none());
        assert!(matches!(
            store.delete_meeting(&meeting.id),
            Err(StoreError::MeetingNotFound(_))
        ));
    }
}
