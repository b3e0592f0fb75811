//! Recording lifecycle scheduler.
//!
//! A single periodic loop reconciles the persisted schedule against the
//! current time and the in-memory registry of live capture processes,
//! driving recordings through scheduled -> recording -> completed / failed /
//! cancelled. Runs are strictly sequential; the loop body completes before
//! the next tick fires.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{SchedulerConfig, StorageConfig};
use crate::database::Database;
use crate::errors::AppError;
use crate::models::*;

pub mod capture;

use capture::{CaptureProcess, CaptureRunner};

pub type ShutdownSender = broadcast::Sender<()>;
pub type ShutdownReceiver = broadcast::Receiver<()>;

pub fn create_shutdown_channel() -> (ShutdownSender, ShutdownReceiver) {
    broadcast::channel(1)
}

/// Derive the capture output file name for a recording.
///
/// Deterministic: the same (start time, title) pair always yields the same
/// name, because the name is computed once to start the capture and again,
/// independently, to locate the finished file. Every character that is not
/// alphanumeric, `.`, `_` or `-` becomes `_`.
pub fn output_file_name(start_time: DateTime<Utc>, title: &str) -> String {
    let timestamp = start_time.format("%Y%m%d_%H%M%S");
    let safe_title: String = title
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{}_{}.ts", timestamp, safe_title)
}

/// Long-lived scheduler instance owning the active-capture registry.
///
/// Constructed once and cloned wherever a handle is needed; all clones share
/// the same registry, so shutdown through any handle stops every capture.
#[derive(Clone)]
pub struct RecordingScheduler {
    database: Database,
    capture: Arc<dyn CaptureRunner>,
    recordings_path: PathBuf,
    check_interval: Duration,
    stop_grace: Duration,
    active_recordings: Arc<Mutex<HashMap<Uuid, Box<dyn CaptureProcess>>>>,
}

impl RecordingScheduler {
    pub fn new(
        database: Database,
        capture: Arc<dyn CaptureRunner>,
        storage: &StorageConfig,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            database,
            capture,
            recordings_path: storage.recordings_path.clone(),
            check_interval: Duration::from_secs(config.check_interval_seconds),
            stop_grace: Duration::from_secs(config.stop_grace_seconds),
            active_recordings: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Run the reconciliation loop until a shutdown signal arrives, then stop
    /// every registered capture before returning. No capture process outlives
    /// this call.
    pub async fn run(self, mut shutdown_rx: ShutdownReceiver) -> Result<()> {
        info!(
            "Recording scheduler started (tick interval {}s)",
            self.check_interval.as_secs()
        );

        let mut ticker = interval(self.check_interval);
        // A stop that exhausts its grace period can overrun a tick; skip the
        // backlog instead of firing catch-up runs.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        error!("Reconciliation tick failed: {}", e);
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Scheduler received shutdown signal");
                    break;
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// One reconciliation tick. Pass order matters: starts before stops so a
    /// very short window is not skipped entirely, and the missed pass runs
    /// after both so it only catches windows nothing else handled.
    pub async fn run_once(&self) -> Result<()> {
        let now = Utc::now();
        debug!("Reconciliation tick at {}", now);

        self.start_due_recordings(now).await?;
        self.stop_finished_recordings(now).await?;
        self.stop_cancelled_recordings().await?;
        self.fail_missed_recordings(now).await?;
        self.reap_dead_captures().await?;

        Ok(())
    }

    async fn start_due_recordings(&self, now: DateTime<Utc>) -> Result<()> {
        let due = self.database.list_recordings_due_to_start(now).await?;

        for DueRecording {
            recording,
            m3u8_url,
        } in due
        {
            let already_active = self
                .active_recordings
                .lock()
                .await
                .contains_key(&recording.id);

            if !already_active {
                let filename = output_file_name(recording.start_time, &recording.title);
                let output_path = self.recordings_path.join(&filename);

                match self.capture.spawn(&m3u8_url, &output_path).await {
                    Ok(process) => {
                        self.active_recordings
                            .lock()
                            .await
                            .insert(recording.id, process);
                    }
                    Err(e) => {
                        // Stays scheduled; retried next tick while the window
                        // is open, failed by the missed pass once it closes.
                        error!(
                            "Failed to start recording '{}' ({}): {}",
                            recording.title, recording.id, e
                        );
                        continue;
                    }
                }
            }

            self.database
                .update_recording_status(recording.id, RecordingStatus::Recording)
                .await?;
            info!("Started recording: {}", recording.title);
        }

        Ok(())
    }

    async fn stop_finished_recordings(&self, now: DateTime<Utc>) -> Result<()> {
        let finished = self.database.list_recordings_due_to_stop(now).await?;

        for recording in finished {
            if let Err(e) = self.stop_capture(recording.id).await {
                error!(
                    "Failed to stop capture for recording '{}' ({}): {}",
                    recording.title, recording.id, e
                );
                continue;
            }

            let filename = output_file_name(recording.start_time, &recording.title);
            let output_path = self.recordings_path.join(&filename);
            let file_size = tokio::fs::metadata(&output_path)
                .await
                .ok()
                .map(|m| m.len() as i64);

            self.database
                .complete_recording(recording.id, &filename, file_size)
                .await?;
            info!("Completed recording: {}", recording.title);
        }

        Ok(())
    }

    /// Reconcile cancellations requested while a capture was already running.
    /// The status was set by the API; only the process needs stopping here,
    /// so cancelled rows with no registered capture (the ever-growing
    /// majority) are skipped without touching them.
    async fn stop_cancelled_recordings(&self) -> Result<()> {
        let active: HashSet<Uuid> = self
            .active_recordings
            .lock()
            .await
            .keys()
            .copied()
            .collect();
        if active.is_empty() {
            return Ok(());
        }

        let cancelled = self
            .database
            .list_recordings_by_status(RecordingStatus::Cancelled)
            .await?;

        for recording in cancelled
            .into_iter()
            .filter(|r| active.contains(&r.id))
        {
            match self.stop_capture(recording.id).await {
                Ok(true) => info!("Cancelled recording: {}", recording.title),
                Ok(false) => {}
                Err(e) => error!(
                    "Failed to stop cancelled recording '{}' ({}): {}",
                    recording.title, recording.id, e
                ),
            }
        }

        Ok(())
    }

    async fn fail_missed_recordings(&self, now: DateTime<Utc>) -> Result<()> {
        let missed = self.database.fail_missed_recordings(now).await?;
        for recording in &missed {
            warn!("Missed recording: {}", recording.title);
        }
        Ok(())
    }

    /// A capture process that crashed between ticks is still in the registry
    /// but no longer running. Reap it and fail the recording immediately
    /// instead of letting the stop pass report a truncated file as completed
    /// at the scheduled end time.
    async fn reap_dead_captures(&self) -> Result<()> {
        let mut dead = Vec::new();

        {
            let mut registry = self.active_recordings.lock().await;
            let ids: Vec<Uuid> = registry.keys().copied().collect();
            for id in ids {
                let exited = registry
                    .get_mut(&id)
                    .map(|process| !process.is_running())
                    .unwrap_or(false);
                if exited {
                    if let Some(mut process) = registry.remove(&id) {
                        let _ = process.wait().await;
                    }
                    dead.push(id);
                }
            }
        }

        for id in dead {
            if self.database.fail_recording_if_active(id).await? {
                warn!("Capture process for recording {} exited early; marked failed", id);
            }
        }

        Ok(())
    }

    /// Stop the capture for `recording_id` if one is registered: request
    /// graceful termination, wait up to the grace period, then force-kill.
    /// Returns `Ok(false)` if nothing was registered (idempotent no-op).
    /// On a failed force-kill the entry is put back so the failure stays
    /// visible; there is no retry path for termination.
    async fn stop_capture(&self, recording_id: Uuid) -> Result<bool> {
        let Some(mut process) = self.active_recordings.lock().await.remove(&recording_id) else {
            return Ok(false);
        };

        if let Err(e) = process.terminate().await {
            warn!(
                "Graceful stop request failed for recording {}: {}",
                recording_id, e
            );
        }

        match tokio::time::timeout(self.stop_grace, process.wait()).await {
            Ok(Ok(())) => Ok(true),
            Ok(Err(e)) => {
                if process.is_running() {
                    self.active_recordings
                        .lock()
                        .await
                        .insert(recording_id, process);
                    Err(AppError::Capture(e).into())
                } else {
                    Ok(true)
                }
            }
            Err(_elapsed) => {
                warn!(
                    "Capture for recording {} did not exit within {}s, killing",
                    recording_id,
                    self.stop_grace.as_secs()
                );
                match process.kill().await {
                    Ok(()) => {
                        let _ = process.wait().await;
                        Ok(true)
                    }
                    Err(e) => {
                        error!(
                            "Force kill failed for recording {}: {}",
                            recording_id, e
                        );
                        self.active_recordings
                            .lock()
                            .await
                            .insert(recording_id, process);
                        Err(AppError::Capture(e).into())
                    }
                }
            }
        }
    }

    /// Stop every registered capture, in arbitrary order.
    pub async fn shutdown(&self) {
        let ids: Vec<Uuid> = self.active_recordings.lock().await.keys().copied().collect();

        for id in ids {
            match self.stop_capture(id).await {
                Ok(true) => info!("Stopped capture for recording {}", id),
                Ok(false) => {}
                Err(e) => error!("Failed to stop capture for recording {}: {}", id, e),
            }
        }

        info!("Recording scheduler stopped");
    }

    /// Reconcile rows left in the recording state by a previous process run.
    /// The child handles are lost, so the capture cannot be re-adopted: if
    /// the window already elapsed and the expected output file exists the
    /// recording is finalized, otherwise it is failed.
    pub async fn recover_orphaned_recordings(&self) -> Result<()> {
        let now = Utc::now();
        let orphaned = self
            .database
            .list_recordings_by_status(RecordingStatus::Recording)
            .await?;

        for recording in orphaned {
            let filename = output_file_name(recording.start_time, &recording.title);
            let output_path = self.recordings_path.join(&filename);
            let file_size = tokio::fs::metadata(&output_path)
                .await
                .ok()
                .map(|m| m.len() as i64);

            if recording.end_time <= now && file_size.is_some() {
                let has_file_row = self
                    .database
                    .get_recorded_file_for_recording(recording.id)
                    .await?
                    .is_some();
                if has_file_row {
                    self.database
                        .update_recording_status(recording.id, RecordingStatus::Completed)
                        .await?;
                } else {
                    self.database
                        .complete_recording(recording.id, &filename, file_size)
                        .await?;
                }
                info!(
                    "Recovered orphaned recording '{}' as completed",
                    recording.title
                );
            } else {
                self.database
                    .update_recording_status(recording.id, RecordingStatus::Failed)
                    .await?;
                warn!(
                    "Orphaned recording '{}' from a previous run marked failed",
                    recording.title
                );
            }
        }

        Ok(())
    }

    /// Identifiers currently present in the active-capture registry.
    pub async fn active_recording_ids(&self) -> Vec<Uuid> {
        self.active_recordings.lock().await.keys().copied().collect()
    }
}
