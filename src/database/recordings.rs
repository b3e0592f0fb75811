use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

use super::{fmt_datetime, parse_datetime, Database};
use crate::models::*;

fn recording_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Recording> {
    let status_str: String = row.get("status");
    let status = RecordingStatus::parse(&status_str)
        .ok_or_else(|| anyhow::anyhow!("Unknown recording status: {}", status_str))?;

    Ok(Recording {
        id: Uuid::parse_str(&row.get::<String, _>("id"))?,
        channel_id: Uuid::parse_str(&row.get::<String, _>("channel_id"))?,
        title: row.get("title"),
        start_time: parse_datetime(&row.get::<String, _>("start_time"))?,
        end_time: parse_datetime(&row.get::<String, _>("end_time"))?,
        status,
        created_at: parse_datetime(&row.get::<String, _>("created_at"))?,
    })
}

fn recording_with_channel_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<RecordingWithChannel> {
    let recording = recording_from_row(row)?;
    let channel = Channel {
        id: recording.channel_id,
        name: row.get("c_name"),
        m3u8_url: row.get("c_m3u8_url"),
        timezone: row.get("c_timezone"),
        created_at: parse_datetime(&row.get::<String, _>("c_created_at"))?,
        updated_at: parse_datetime(&row.get::<String, _>("c_updated_at"))?,
    };
    Ok(RecordingWithChannel { recording, channel })
}

const RECORDING_WITH_CHANNEL_SELECT: &str =
    "SELECT r.id, r.channel_id, r.title, r.start_time, r.end_time, r.status, r.created_at,
            c.name AS c_name, c.m3u8_url AS c_m3u8_url, c.timezone AS c_timezone,
            c.created_at AS c_created_at, c.updated_at AS c_updated_at
     FROM recordings r JOIN channels c ON r.channel_id = c.id";

impl Database {
    pub async fn list_recordings(
        &self,
        channel_id: Option<Uuid>,
        status: Option<RecordingStatus>,
    ) -> Result<Vec<RecordingWithChannel>> {
        let mut sql = String::from(RECORDING_WITH_CHANNEL_SELECT);
        let mut clauses = Vec::new();
        if channel_id.is_some() {
            clauses.push("r.channel_id = ?");
        }
        if status.is_some() {
            clauses.push("r.status = ?");
        }
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY r.start_time DESC");

        let mut query = sqlx::query(&sql);
        if let Some(id) = channel_id {
            query = query.bind(id.to_string());
        }
        if let Some(status) = status {
            query = query.bind(status.as_str());
        }

        let rows = query.fetch_all(&self.pool()).await?;
        rows.iter().map(recording_with_channel_from_row).collect()
    }

    pub async fn get_recording(&self, recording_id: Uuid) -> Result<Option<Recording>> {
        let row = sqlx::query(
            "SELECT id, channel_id, title, start_time, end_time, status, created_at
             FROM recordings WHERE id = ?",
        )
        .bind(recording_id.to_string())
        .fetch_optional(&self.pool())
        .await?;

        row.as_ref().map(recording_from_row).transpose()
    }

    pub async fn get_recording_with_channel(
        &self,
        recording_id: Uuid,
    ) -> Result<Option<RecordingWithChannel>> {
        let sql = format!("{} WHERE r.id = ?", RECORDING_WITH_CHANNEL_SELECT);
        let row = sqlx::query(&sql)
            .bind(recording_id.to_string())
            .fetch_optional(&self.pool())
            .await?;

        row.as_ref().map(recording_with_channel_from_row).transpose()
    }

    pub async fn create_recording(&self, request: &RecordingCreateRequest) -> Result<Recording> {
        let recording = Recording {
            id: Uuid::new_v4(),
            channel_id: request.channel_id,
            title: request.title.clone(),
            start_time: request.start_time,
            end_time: request.end_time,
            status: RecordingStatus::Scheduled,
            created_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO recordings (id, channel_id, title, start_time, end_time, status, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(recording.id.to_string())
        .bind(recording.channel_id.to_string())
        .bind(&recording.title)
        .bind(fmt_datetime(recording.start_time))
        .bind(fmt_datetime(recording.end_time))
        .bind(recording.status.as_str())
        .bind(fmt_datetime(recording.created_at))
        .execute(&self.pool())
        .await?;

        Ok(recording)
    }

    pub async fn update_recording(
        &self,
        recording_id: Uuid,
        request: &RecordingUpdateRequest,
    ) -> Result<Option<Recording>> {
        let Some(existing) = self.get_recording(recording_id).await? else {
            return Ok(None);
        };

        let updated = Recording {
            title: request.title.clone().unwrap_or(existing.title),
            start_time: request.start_time.unwrap_or(existing.start_time),
            end_time: request.end_time.unwrap_or(existing.end_time),
            ..existing
        };

        sqlx::query("UPDATE recordings SET title = ?, start_time = ?, end_time = ? WHERE id = ?")
            .bind(&updated.title)
            .bind(fmt_datetime(updated.start_time))
            .bind(fmt_datetime(updated.end_time))
            .bind(recording_id.to_string())
            .execute(&self.pool())
            .await?;

        Ok(Some(updated))
    }

    pub async fn delete_recording(&self, recording_id: Uuid) -> Result<bool> {
        let mut transaction = self.pool().begin().await?;

        sqlx::query("DELETE FROM recorded_files WHERE recording_id = ?")
            .bind(recording_id.to_string())
            .execute(&mut *transaction)
            .await?;

        let result = sqlx::query("DELETE FROM recordings WHERE id = ?")
            .bind(recording_id.to_string())
            .execute(&mut *transaction)
            .await?;

        transaction.commit().await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn update_recording_status(
        &self,
        recording_id: Uuid,
        status: RecordingStatus,
    ) -> Result<()> {
        sqlx::query("UPDATE recordings SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(recording_id.to_string())
            .execute(&self.pool())
            .await?;
        Ok(())
    }

    /// Scheduled recordings whose window has opened and not yet closed,
    /// joined with the channel stream URL the capture needs.
    pub async fn list_recordings_due_to_start(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<DueRecording>> {
        let sql = format!(
            "{} WHERE r.status = ? AND r.start_time <= ? AND r.end_time > ?",
            RECORDING_WITH_CHANNEL_SELECT
        );
        let rows = sqlx::query(&sql)
            .bind(RecordingStatus::Scheduled.as_str())
            .bind(fmt_datetime(now))
            .bind(fmt_datetime(now))
            .fetch_all(&self.pool())
            .await?;

        rows.iter()
            .map(|row| {
                let with_channel = recording_with_channel_from_row(row)?;
                Ok(DueRecording {
                    recording: with_channel.recording,
                    m3u8_url: with_channel.channel.m3u8_url,
                })
            })
            .collect()
    }

    /// Active recordings whose window has closed.
    pub async fn list_recordings_due_to_stop(&self, now: DateTime<Utc>) -> Result<Vec<Recording>> {
        let rows = sqlx::query(
            "SELECT id, channel_id, title, start_time, end_time, status, created_at
             FROM recordings WHERE status = ? AND end_time <= ?",
        )
        .bind(RecordingStatus::Recording.as_str())
        .bind(fmt_datetime(now))
        .fetch_all(&self.pool())
        .await?;

        rows.iter().map(recording_from_row).collect()
    }

    pub async fn list_recordings_by_status(
        &self,
        status: RecordingStatus,
    ) -> Result<Vec<Recording>> {
        let rows = sqlx::query(
            "SELECT id, channel_id, title, start_time, end_time, status, created_at
             FROM recordings WHERE status = ?",
        )
        .bind(status.as_str())
        .fetch_all(&self.pool())
        .await?;

        rows.iter().map(recording_from_row).collect()
    }

    /// Mark every scheduled recording whose entire window elapsed as failed.
    /// Selection and update commit as one batch; returns the failed rows for
    /// logging.
    pub async fn fail_missed_recordings(&self, now: DateTime<Utc>) -> Result<Vec<Recording>> {
        let mut transaction = self.pool().begin().await?;

        let rows = sqlx::query(
            "SELECT id, channel_id, title, start_time, end_time, status, created_at
             FROM recordings WHERE status = ? AND end_time <= ?",
        )
        .bind(RecordingStatus::Scheduled.as_str())
        .bind(fmt_datetime(now))
        .fetch_all(&mut *transaction)
        .await?;

        let missed: Vec<Recording> = rows
            .iter()
            .map(recording_from_row)
            .collect::<Result<_>>()?;

        if !missed.is_empty() {
            sqlx::query("UPDATE recordings SET status = ? WHERE status = ? AND end_time <= ?")
                .bind(RecordingStatus::Failed.as_str())
                .bind(RecordingStatus::Scheduled.as_str())
                .bind(fmt_datetime(now))
                .execute(&mut *transaction)
                .await?;
        }

        transaction.commit().await?;

        Ok(missed)
    }

    /// Transition a recording to completed and create its RecordedFile row in
    /// a single transaction.
    pub async fn complete_recording(
        &self,
        recording_id: Uuid,
        file_path: &str,
        file_size: Option<i64>,
    ) -> Result<RecordedFile> {
        let file = RecordedFile {
            id: Uuid::new_v4(),
            recording_id,
            file_path: file_path.to_string(),
            file_size,
            created_at: Utc::now(),
        };

        let mut transaction = self.pool().begin().await?;

        sqlx::query("UPDATE recordings SET status = ? WHERE id = ?")
            .bind(RecordingStatus::Completed.as_str())
            .bind(recording_id.to_string())
            .execute(&mut *transaction)
            .await?;

        sqlx::query(
            "INSERT INTO recorded_files (id, recording_id, file_path, file_size, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(file.id.to_string())
        .bind(file.recording_id.to_string())
        .bind(&file.file_path)
        .bind(file.file_size)
        .bind(fmt_datetime(file.created_at))
        .execute(&mut *transaction)
        .await?;

        transaction.commit().await?;

        Ok(file)
    }

    /// Mark a recording failed only if it is still in the recording state.
    /// Used when a capture process is found dead; a cancellation that raced
    /// in must not be overwritten.
    pub async fn fail_recording_if_active(&self, recording_id: Uuid) -> Result<bool> {
        let result = sqlx::query("UPDATE recordings SET status = ? WHERE id = ? AND status = ?")
            .bind(RecordingStatus::Failed.as_str())
            .bind(recording_id.to_string())
            .bind(RecordingStatus::Recording.as_str())
            .execute(&self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
