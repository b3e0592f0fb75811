use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Channel {
    pub id: Uuid,
    pub name: String,
    pub m3u8_url: String,
    pub timezone: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Lifecycle state of a scheduled recording.
///
/// Transitions are one-directional (`Scheduled -> Recording -> Completed`)
/// except that `Cancelled` may be applied from the API while a capture is
/// still running; the scheduler reconciles the running process on its next
/// tick.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "recording_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RecordingStatus {
    Scheduled,
    Recording,
    Completed,
    Failed,
    Cancelled,
}

impl RecordingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordingStatus::Scheduled => "scheduled",
            RecordingStatus::Recording => "recording",
            RecordingStatus::Completed => "completed",
            RecordingStatus::Failed => "failed",
            RecordingStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(RecordingStatus::Scheduled),
            "recording" => Some(RecordingStatus::Recording),
            "completed" => Some(RecordingStatus::Completed),
            "failed" => Some(RecordingStatus::Failed),
            "cancelled" => Some(RecordingStatus::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Recording {
    pub id: Uuid,
    pub channel_id: Uuid,
    pub title: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: RecordingStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RecordedFile {
    pub id: Uuid,
    pub recording_id: Uuid,
    /// Path relative to the configured recordings directory.
    pub file_path: String,
    pub file_size: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingWithChannel {
    #[serde(flatten)]
    pub recording: Recording,
    pub channel: Channel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordedFileWithRecording {
    #[serde(flatten)]
    pub file: RecordedFile,
    pub recording: RecordingWithChannel,
}

/// A recording whose window has opened, joined with its channel's stream URL.
#[derive(Debug, Clone)]
pub struct DueRecording {
    pub recording: Recording,
    pub m3u8_url: String,
}

// API request/response types

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelCreateRequest {
    pub name: String,
    pub m3u8_url: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelUpdateRequest {
    pub name: Option<String>,
    pub m3u8_url: Option<String>,
    pub timezone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingCreateRequest {
    pub channel_id: Uuid,
    pub title: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingUpdateRequest {
    pub title: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

/// Recording window rendered in the owning channel's display timezone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeConversionResponse {
    pub channel_timezone: String,
    pub channel_start_time: String,
    pub channel_end_time: String,
    pub utc_start_time: DateTime<Utc>,
    pub utc_end_time: DateTime<Utc>,
}
