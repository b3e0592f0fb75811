use anyhow::Result;
use sqlx::Row;
use uuid::Uuid;

use super::{parse_datetime, Database};
use crate::models::*;

fn recorded_file_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<RecordedFile> {
    Ok(RecordedFile {
        id: Uuid::parse_str(&row.get::<String, _>("id"))?,
        recording_id: Uuid::parse_str(&row.get::<String, _>("recording_id"))?,
        file_path: row.get("file_path"),
        file_size: row.get("file_size"),
        created_at: parse_datetime(&row.get::<String, _>("created_at"))?,
    })
}

impl Database {
    pub async fn list_recorded_files(&self) -> Result<Vec<RecordedFileWithRecording>> {
        let rows = sqlx::query(
            "SELECT f.id, f.recording_id, f.file_path, f.file_size, f.created_at
             FROM recorded_files f ORDER BY f.created_at DESC",
        )
        .fetch_all(&self.pool())
        .await?;

        let mut files = Vec::new();
        for row in &rows {
            let file = recorded_file_from_row(row)?;
            let Some(recording) = self.get_recording_with_channel(file.recording_id).await? else {
                continue;
            };
            files.push(RecordedFileWithRecording { file, recording });
        }

        Ok(files)
    }

    pub async fn get_recorded_file(&self, file_id: Uuid) -> Result<Option<RecordedFile>> {
        let row = sqlx::query(
            "SELECT id, recording_id, file_path, file_size, created_at
             FROM recorded_files WHERE id = ?",
        )
        .bind(file_id.to_string())
        .fetch_optional(&self.pool())
        .await?;

        row.as_ref().map(recorded_file_from_row).transpose()
    }

    pub async fn get_recorded_file_with_recording(
        &self,
        file_id: Uuid,
    ) -> Result<Option<RecordedFileWithRecording>> {
        let Some(file) = self.get_recorded_file(file_id).await? else {
            return Ok(None);
        };
        let Some(recording) = self.get_recording_with_channel(file.recording_id).await? else {
            return Ok(None);
        };
        Ok(Some(RecordedFileWithRecording { file, recording }))
    }

    pub async fn get_recorded_file_for_recording(
        &self,
        recording_id: Uuid,
    ) -> Result<Option<RecordedFile>> {
        let row = sqlx::query(
            "SELECT id, recording_id, file_path, file_size, created_at
             FROM recorded_files WHERE recording_id = ?",
        )
        .bind(recording_id.to_string())
        .fetch_optional(&self.pool())
        .await?;

        row.as_ref().map(recorded_file_from_row).transpose()
    }

    pub async fn delete_recorded_file(&self, file_id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM recorded_files WHERE id = ?")
            .bind(file_id.to_string())
            .execute(&self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
