//! Transcript persistence: the atomic replace-and-complete write, and
//! ordered reads.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::domain::{
    MeetingStatus, NewSegment, NewSpeaker, Speaker, Transcript, TranscriptSegment,
};

use super::meetings::{get_meeting_impl, parse_timestamp, set_meeting_status_impl};
use super::{StoreError, TranscriptStore};

impl TranscriptStore {
    /// Atomically persist a transcription result for a meeting.
    ///
    /// In a single transaction: any prior transcript graph for the meeting
    /// is removed, the new transcript, speakers and segments are inserted
    /// (segments in ascending start-time order), and the meeting is moved
    /// to `Completed`. If any step fails, nothing is visible.
    ///
    /// Returns the new transcript id.
    pub fn replace_transcript(
        &self,
        meeting_id: &str,
        text: &str,
        language: &str,
        confidence: f64,
        segments: &[NewSegment],
        speakers: &[NewSpeaker],
    ) -> Result<String, StoreError> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;

            if get_meeting_impl(&tx, meeting_id)?.is_none() {
                return Err(StoreError::MeetingNotFound(meeting_id.to_string()));
            }

            // A retried job that succeeds replaces whatever an earlier run
            // left behind; cascade removes its segments and speakers.
            tx.execute(
                "DELETE FROM transcripts WHERE meeting_id = ?1",
                params![meeting_id],
            )?;

            let transcript_id = Uuid::new_v4().to_string();
            tx.execute(
                r#"
                INSERT INTO transcripts (id, meeting_id, text, language, confidence, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![
                    transcript_id,
                    meeting_id,
                    text,
                    language,
                    confidence,
                    Utc::now().to_rfc3339(),
                ],
            )?;

            let mut speaker_ids: Vec<(String, String)> = Vec::with_capacity(speakers.len());
            for speaker in speakers {
                let speaker_id = Uuid::new_v4().to_string();
                tx.execute(
                    r#"
                    INSERT INTO speakers (id, transcript_id, label, display_name)
                    VALUES (?1, ?2, ?3, ?4)
                    "#,
                    params![speaker_id, transcript_id, speaker.label, speaker.display_name],
                )?;
                speaker_ids.push((speaker.label.clone(), speaker_id));
            }

            let mut prev_start = f64::NEG_INFINITY;
            for (position, segment) in segments.iter().enumerate() {
                if segment.end_time <= segment.start_time {
                    return Err(StoreError::InvalidSegment(format!(
                        "segment {} ends at {} before it starts at {}",
                        position, segment.end_time, segment.start_time
                    )));
                }
                if segment.start_time < prev_start {
                    return Err(StoreError::InvalidSegment(format!(
                        "segment {} starts at {} out of order (previous start {})",
                        position, segment.start_time, prev_start
                    )));
                }
                prev_start = segment.start_time;

                let seg_confidence = segment.confidence.unwrap_or(confidence);
                if !(0.0..=1.0).contains(&seg_confidence) {
                    return Err(StoreError::InvalidSegment(format!(
                        "segment {} confidence {} outside [0, 1]",
                        position, seg_confidence
                    )));
                }

                let speaker_id = segment.speaker_label.as_ref().and_then(|label| {
                    speaker_ids
                        .iter()
                        .find(|(l, _)| l == label)
                        .map(|(_, id)| id.clone())
                });

                tx.execute(
                    r#"
                    INSERT INTO transcript_segments (
                        id, transcript_id, speaker_id, position,
                        text, start_time, end_time, confidence
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                    "#,
                    params![
                        Uuid::new_v4().to_string(),
                        transcript_id,
                        speaker_id,
                        position as u32,
                        segment.text,
                        segment.start_time,
                        segment.end_time,
                        seg_confidence,
                    ],
                )?;
            }

            set_meeting_status_impl(&tx, meeting_id, MeetingStatus::Completed)?;

            tx.commit()?;
            Ok(transcript_id)
        })
    }

    /// Read back a meeting's transcript with segments in ascending
    /// start-time order, or `None` if no transcript exists.
    pub fn get_transcript(&self, meeting_id: &str) -> Result<Option<Transcript>, StoreError> {
        self.with_conn(|conn| {
            let header = conn
                .query_row(
                    r#"
                    SELECT id, meeting_id, text, language, confidence, created_at
                    FROM transcripts
                    WHERE meeting_id = ?1
                    "#,
                    params![meeting_id],
                    |row| {
                        let created_at: String = row.get(5)?;
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, f64>(4)?,
                            parse_timestamp(5, &created_at)?,
                        ))
                    },
                )
                .optional()?;

            let Some((id, meeting_id, text, language, confidence, created_at)) = header else {
                return Ok(None);
            };

            let segments = load_segments(conn, &id)?;
            let speakers = load_speakers(conn, &id)?;

            Ok(Some(Transcript {
                id,
                meeting_id,
                text,
                language,
                confidence,
                created_at,
                segments,
                speakers,
            }))
        })
    }
}

fn load_segments(conn: &Connection, transcript_id: &str) -> Result<Vec<TranscriptSegment>, StoreError> {
    let mut stmt = conn.prepare(
        r#"
        SELECT id, speaker_id, position, text, start_time, end_time, confidence
        FROM transcript_segments
        WHERE transcript_id = ?1
        ORDER BY start_time ASC, position ASC
        "#,
    )?;

    let rows = stmt.query_map(params![transcript_id], |row| {
        Ok(TranscriptSegment {
            id: row.get(0)?,
            speaker_id: row.get(1)?,
            position: row.get(2)?,
            text: row.get(3)?,
            start_time: row.get(4)?,
            end_time: row.get(5)?,
            confidence: row.get(6)?,
        })
    })?;

    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

fn load_speakers(conn: &Connection, transcript_id: &str) -> Result<Vec<Speaker>, StoreError> {
    let mut stmt = conn.prepare(
        r#"
        SELECT id, label, display_name
        FROM speakers
        WHERE transcript_id = ?1
        ORDER BY label ASC
        "#,
    )?;

    let rows = stmt.query_map(params![transcript_id], |row| {
        Ok(Speaker {
            id: row.get(0)?,
            label: row.get(1)?,
            display_name: row.get(2)?,
        })
    })?;

    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}
