use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};
use uuid::Uuid;

use super::AppState;
use crate::models::*;
use crate::utils::time::{available_timezones, format_in_timezone, validate_timezone};

pub async fn health_check() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

// Channels API

pub async fn list_channels(
    State(state): State<AppState>,
) -> Result<Json<Vec<Channel>>, StatusCode> {
    match state.database.list_channels().await {
        Ok(channels) => Ok(Json(channels)),
        Err(e) => {
            error!("Failed to list channels: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

pub async fn get_channel(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<Channel>, StatusCode> {
    match state.database.get_channel(id).await {
        Ok(Some(channel)) => Ok(Json(channel)),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            error!("Failed to get channel {}: {}", id, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

pub async fn create_channel(
    State(state): State<AppState>,
    Json(payload): Json<ChannelCreateRequest>,
) -> Result<(StatusCode, Json<Channel>), StatusCode> {
    if !validate_timezone(&payload.timezone) {
        return Err(StatusCode::BAD_REQUEST);
    }
    if url::Url::parse(&payload.m3u8_url).is_err() {
        return Err(StatusCode::BAD_REQUEST);
    }

    match state.database.create_channel(&payload).await {
        Ok(channel) => Ok((StatusCode::CREATED, Json(channel))),
        Err(e) => {
            error!("Failed to create channel: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

pub async fn update_channel(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(payload): Json<ChannelUpdateRequest>,
) -> Result<Json<Channel>, StatusCode> {
    if let Some(tz) = &payload.timezone {
        if !validate_timezone(tz) {
            return Err(StatusCode::BAD_REQUEST);
        }
    }
    if let Some(url) = &payload.m3u8_url {
        if url::Url::parse(url).is_err() {
            return Err(StatusCode::BAD_REQUEST);
        }
    }

    match state.database.update_channel(id, &payload).await {
        Ok(Some(channel)) => Ok(Json(channel)),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            error!("Failed to update channel {}: {}", id, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

pub async fn delete_channel(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<StatusCode, StatusCode> {
    match state.database.delete_channel(id).await {
        Ok(true) => Ok(StatusCode::NO_CONTENT),
        Ok(false) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            error!("Failed to delete channel {}: {}", id, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

pub async fn list_timezones() -> Json<Vec<&'static str>> {
    Json(available_timezones())
}

// Recordings API

#[derive(Debug, Deserialize)]
pub struct RecordingQueryParams {
    pub channel_id: Option<Uuid>,
    pub status: Option<RecordingStatus>,
}

pub async fn list_recordings(
    Query(params): Query<RecordingQueryParams>,
    State(state): State<AppState>,
) -> Result<Json<Vec<RecordingWithChannel>>, StatusCode> {
    match state
        .database
        .list_recordings(params.channel_id, params.status)
        .await
    {
        Ok(recordings) => Ok(Json(recordings)),
        Err(e) => {
            error!("Failed to list recordings: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

pub async fn get_recording(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<RecordingWithChannel>, StatusCode> {
    match state.database.get_recording_with_channel(id).await {
        Ok(Some(recording)) => Ok(Json(recording)),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            error!("Failed to get recording {}: {}", id, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

pub async fn create_recording(
    State(state): State<AppState>,
    Json(payload): Json<RecordingCreateRequest>,
) -> Result<(StatusCode, Json<RecordingWithChannel>), StatusCode> {
    match state.database.get_channel(payload.channel_id).await {
        Ok(Some(_)) => {}
        Ok(None) => return Err(StatusCode::NOT_FOUND),
        Err(e) => {
            error!("Failed to look up channel {}: {}", payload.channel_id, e);
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    }

    if payload.end_time <= payload.start_time {
        return Err(StatusCode::BAD_REQUEST);
    }

    let recording = match state.database.create_recording(&payload).await {
        Ok(recording) => recording,
        Err(e) => {
            error!("Failed to create recording: {}", e);
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    match state.database.get_recording_with_channel(recording.id).await {
        Ok(Some(with_channel)) => Ok((StatusCode::CREATED, Json(with_channel))),
        _ => Err(StatusCode::INTERNAL_SERVER_ERROR),
    }
}

pub async fn update_recording(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(payload): Json<RecordingUpdateRequest>,
) -> Result<Json<Recording>, StatusCode> {
    let existing = match state.database.get_recording(id).await {
        Ok(Some(recording)) => recording,
        Ok(None) => return Err(StatusCode::NOT_FOUND),
        Err(e) => {
            error!("Failed to get recording {}: {}", id, e);
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    // Only pending reservations can be edited.
    if existing.status != RecordingStatus::Scheduled {
        return Err(StatusCode::BAD_REQUEST);
    }

    let start_time = payload.start_time.unwrap_or(existing.start_time);
    let end_time = payload.end_time.unwrap_or(existing.end_time);
    if end_time <= start_time {
        return Err(StatusCode::BAD_REQUEST);
    }

    match state.database.update_recording(id, &payload).await {
        Ok(Some(recording)) => Ok(Json(recording)),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            error!("Failed to update recording {}: {}", id, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Delete a reservation. An in-flight recording is marked cancelled instead
/// of being removed; the scheduler stops its capture process within one tick.
pub async fn delete_recording(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<StatusCode, StatusCode> {
    let existing = match state.database.get_recording(id).await {
        Ok(Some(recording)) => recording,
        Ok(None) => return Err(StatusCode::NOT_FOUND),
        Err(e) => {
            error!("Failed to get recording {}: {}", id, e);
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    let result = if existing.status == RecordingStatus::Recording {
        info!("Cancelling in-flight recording: {}", existing.title);
        state
            .database
            .update_recording_status(id, RecordingStatus::Cancelled)
            .await
    } else {
        state.database.delete_recording(id).await.map(|_| ())
    };

    match result {
        Ok(()) => Ok(StatusCode::NO_CONTENT),
        Err(e) => {
            error!("Failed to delete recording {}: {}", id, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

pub async fn convert_recording_time(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<TimeConversionResponse>, StatusCode> {
    let with_channel = match state.database.get_recording_with_channel(id).await {
        Ok(Some(with_channel)) => with_channel,
        Ok(None) => return Err(StatusCode::NOT_FOUND),
        Err(e) => {
            error!("Failed to get recording {}: {}", id, e);
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    let recording = &with_channel.recording;
    let timezone = &with_channel.channel.timezone;

    Ok(Json(TimeConversionResponse {
        channel_timezone: timezone.clone(),
        channel_start_time: format_in_timezone(recording.start_time, timezone),
        channel_end_time: format_in_timezone(recording.end_time, timezone),
        utc_start_time: recording.start_time,
        utc_end_time: recording.end_time,
    }))
}

// Recorded files API

pub async fn list_files(
    State(state): State<AppState>,
) -> Result<Json<Vec<RecordedFileWithRecording>>, StatusCode> {
    match state.database.list_recorded_files().await {
        Ok(files) => Ok(Json(files)),
        Err(e) => {
            error!("Failed to list recorded files: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

pub async fn get_file(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<RecordedFileWithRecording>, StatusCode> {
    match state.database.get_recorded_file_with_recording(id).await {
        Ok(Some(file)) => Ok(Json(file)),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            error!("Failed to get recorded file {}: {}", id, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

fn resolve_file_path(state: &AppState, file_path: &str) -> std::path::PathBuf {
    let path = std::path::Path::new(file_path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        state.config.storage.recordings_path.join(path)
    }
}

pub async fn download_file(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Response, StatusCode> {
    let file = match state.database.get_recorded_file(id).await {
        Ok(Some(file)) => file,
        Ok(None) => return Err(StatusCode::NOT_FOUND),
        Err(e) => {
            error!("Failed to get recorded file {}: {}", id, e);
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    // Recordings run to multiple gigabytes; stream from disk instead of
    // buffering the whole file into memory.
    let path = resolve_file_path(&state, &file.file_path);
    let handle = match tokio::fs::File::open(&path).await {
        Ok(handle) => handle,
        Err(_) => return Err(StatusCode::NOT_FOUND),
    };
    let body = Body::from_stream(tokio_util::io::ReaderStream::new(handle));

    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("recording.ts")
        .to_string();

    let headers = [
        (header::CONTENT_TYPE, "video/MP2T".to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", filename),
        ),
    ];

    Ok((headers, body).into_response())
}

pub async fn delete_file(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<StatusCode, StatusCode> {
    let file = match state.database.get_recorded_file(id).await {
        Ok(Some(file)) => file,
        Ok(None) => return Err(StatusCode::NOT_FOUND),
        Err(e) => {
            error!("Failed to get recorded file {}: {}", id, e);
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    // Remove from disk first, then the row; a missing file is not an error.
    let path = resolve_file_path(&state, &file.file_path);
    if let Err(e) = tokio::fs::remove_file(&path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            error!("Failed to remove {} from disk: {}", path.display(), e);
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    }

    match state.database.delete_recorded_file(id).await {
        Ok(true) => Ok(StatusCode::NO_CONTENT),
        Ok(false) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            error!("Failed to delete recorded file {}: {}", id, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
