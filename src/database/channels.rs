use anyhow::Result;
use chrono::Utc;
use sqlx::Row;
use uuid::Uuid;

use super::{fmt_datetime, parse_datetime, Database};
use crate::models::*;

fn channel_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Channel> {
    Ok(Channel {
        id: Uuid::parse_str(&row.get::<String, _>("id"))?,
        name: row.get("name"),
        m3u8_url: row.get("m3u8_url"),
        timezone: row.get("timezone"),
        created_at: parse_datetime(&row.get::<String, _>("created_at"))?,
        updated_at: parse_datetime(&row.get::<String, _>("updated_at"))?,
    })
}

impl Database {
    pub async fn list_channels(&self) -> Result<Vec<Channel>> {
        let rows = sqlx::query(
            "SELECT id, name, m3u8_url, timezone, created_at, updated_at
             FROM channels ORDER BY name",
        )
        .fetch_all(&self.pool())
        .await?;

        rows.iter().map(channel_from_row).collect()
    }

    pub async fn get_channel(&self, channel_id: Uuid) -> Result<Option<Channel>> {
        let row = sqlx::query(
            "SELECT id, name, m3u8_url, timezone, created_at, updated_at
             FROM channels WHERE id = ?",
        )
        .bind(channel_id.to_string())
        .fetch_optional(&self.pool())
        .await?;

        row.as_ref().map(channel_from_row).transpose()
    }

    pub async fn create_channel(&self, request: &ChannelCreateRequest) -> Result<Channel> {
        let channel = Channel {
            id: Uuid::new_v4(),
            name: request.name.clone(),
            m3u8_url: request.m3u8_url.clone(),
            timezone: request.timezone.clone(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO channels (id, name, m3u8_url, timezone, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(channel.id.to_string())
        .bind(&channel.name)
        .bind(&channel.m3u8_url)
        .bind(&channel.timezone)
        .bind(fmt_datetime(channel.created_at))
        .bind(fmt_datetime(channel.updated_at))
        .execute(&self.pool())
        .await?;

        Ok(channel)
    }

    pub async fn update_channel(
        &self,
        channel_id: Uuid,
        request: &ChannelUpdateRequest,
    ) -> Result<Option<Channel>> {
        let Some(existing) = self.get_channel(channel_id).await? else {
            return Ok(None);
        };

        let updated = Channel {
            name: request.name.clone().unwrap_or(existing.name),
            m3u8_url: request.m3u8_url.clone().unwrap_or(existing.m3u8_url),
            timezone: request.timezone.clone().unwrap_or(existing.timezone),
            updated_at: Utc::now(),
            ..existing
        };

        sqlx::query(
            "UPDATE channels SET name = ?, m3u8_url = ?, timezone = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&updated.name)
        .bind(&updated.m3u8_url)
        .bind(&updated.timezone)
        .bind(fmt_datetime(updated.updated_at))
        .bind(channel_id.to_string())
        .execute(&self.pool())
        .await?;

        Ok(Some(updated))
    }

    pub async fn delete_channel(&self, channel_id: Uuid) -> Result<bool> {
        // SQLite foreign keys are off by default, so cascade by hand in one
        // transaction: files -> recordings -> channel.
        let mut transaction = self.pool().begin().await?;

        sqlx::query(
            "DELETE FROM recorded_files WHERE recording_id IN
             (SELECT id FROM recordings WHERE channel_id = ?)",
        )
        .bind(channel_id.to_string())
        .execute(&mut *transaction)
        .await?;

        sqlx::query("DELETE FROM recordings WHERE channel_id = ?")
            .bind(channel_id.to_string())
            .execute(&mut *transaction)
            .await?;

        let result = sqlx::query("DELETE FROM channels WHERE id = ?")
            .bind(channel_id.to_string())
            .execute(&mut *transaction)
            .await?;

        transaction.commit().await?;

        Ok(result.rows_affected() > 0)
    }
}
