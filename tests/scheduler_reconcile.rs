use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use m3u8_recorder::config::{DatabaseConfig, SchedulerConfig, StorageConfig};
use m3u8_recorder::database::Database;
use m3u8_recorder::errors::CaptureError;
use m3u8_recorder::models::*;
use m3u8_recorder::scheduler::capture::{CaptureProcess, CaptureRunner};
use m3u8_recorder::scheduler::{output_file_name, RecordingScheduler};

// Fake capture runner: records every spawn and exposes per-process state so
// tests can observe termination and simulate crashes.

struct ProcessState {
    running: AtomicBool,
    terminated: AtomicBool,
    killed: AtomicBool,
}

#[derive(Clone)]
struct SpawnRecord {
    url: String,
    path: PathBuf,
    state: Arc<ProcessState>,
}

#[derive(Clone, Default)]
struct MockCapture {
    spawned: Arc<Mutex<Vec<SpawnRecord>>>,
    fail_spawn: Arc<AtomicBool>,
    ignore_terminate: Arc<AtomicBool>,
}

impl MockCapture {
    fn spawned(&self) -> Vec<SpawnRecord> {
        self.spawned.lock().unwrap().clone()
    }

    fn set_fail_spawn(&self, fail: bool) {
        self.fail_spawn.store(fail, Ordering::SeqCst);
    }

    /// Subsequently spawned processes shrug off graceful stop requests and
    /// only exit when killed.
    fn set_ignore_terminate(&self, ignore: bool) {
        self.ignore_terminate.store(ignore, Ordering::SeqCst);
    }
}

#[async_trait]
impl CaptureRunner for MockCapture {
    async fn spawn(
        &self,
        source_url: &str,
        output_path: &Path,
    ) -> Result<Box<dyn CaptureProcess>, CaptureError> {
        if self.fail_spawn.load(Ordering::SeqCst) {
            return Err(CaptureError::SpawnFailed(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "capture binary not found",
            )));
        }

        let state = Arc::new(ProcessState {
            running: AtomicBool::new(true),
            terminated: AtomicBool::new(false),
            killed: AtomicBool::new(false),
        });
        self.spawned.lock().unwrap().push(SpawnRecord {
            url: source_url.to_string(),
            path: output_path.to_path_buf(),
            state: state.clone(),
        });

        Ok(Box::new(MockProcess {
            state,
            ignore_terminate: self.ignore_terminate.load(Ordering::SeqCst),
        }))
    }
}

struct MockProcess {
    state: Arc<ProcessState>,
    ignore_terminate: bool,
}

#[async_trait]
impl CaptureProcess for MockProcess {
    async fn terminate(&mut self) -> Result<(), CaptureError> {
        self.state.terminated.store(true, Ordering::SeqCst);
        if !self.ignore_terminate {
            self.state.running.store(false, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn kill(&mut self) -> Result<(), CaptureError> {
        self.state.killed.store(true, Ordering::SeqCst);
        self.state.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn wait(&mut self) -> Result<(), CaptureError> {
        while self.state.running.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        Ok(())
    }

    fn is_running(&mut self) -> bool {
        self.state.running.load(Ordering::SeqCst)
    }
}

struct TestHarness {
    database: Database,
    scheduler: RecordingScheduler,
    capture: MockCapture,
    recordings_dir: PathBuf,
}

async fn setup() -> TestHarness {
    let dir = std::env::temp_dir().join(format!("m3u8-recorder-test-{}", Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();

    let database = Database::new(&DatabaseConfig {
        url: format!("sqlite://{}", dir.join("test.db").display()),
        max_connections: Some(5),
    })
    .await
    .unwrap();
    database.migrate().await.unwrap();

    let capture = MockCapture::default();
    let scheduler = RecordingScheduler::new(
        database.clone(),
        Arc::new(capture.clone()),
        &StorageConfig {
            recordings_path: dir.clone(),
        },
        &SchedulerConfig {
            check_interval_seconds: 30,
            stop_grace_seconds: 1,
            ffmpeg_command: "ffmpeg".to_string(),
        },
    );

    TestHarness {
        database,
        scheduler,
        capture,
        recordings_dir: dir,
    }
}

async fn create_channel(database: &Database) -> Channel {
    database
        .create_channel(&ChannelCreateRequest {
            name: "Test Channel".to_string(),
            m3u8_url: "http://example.com/stream.m3u8".to_string(),
            timezone: "UTC".to_string(),
        })
        .await
        .unwrap()
}

/// Create a recording whose window is expressed as offsets (in seconds)
/// relative to now.
async fn create_recording(
    database: &Database,
    channel_id: Uuid,
    title: &str,
    start_offset: i64,
    end_offset: i64,
) -> Recording {
    let now = Utc::now();
    database
        .create_recording(&RecordingCreateRequest {
            channel_id,
            title: title.to_string(),
            start_time: now + ChronoDuration::seconds(start_offset),
            end_time: now + ChronoDuration::seconds(end_offset),
        })
        .await
        .unwrap()
}

async fn status_of(database: &Database, id: Uuid) -> RecordingStatus {
    database.get_recording(id).await.unwrap().unwrap().status
}

#[tokio::test]
async fn test_due_recording_is_started() {
    let h = setup().await;
    let channel = create_channel(&h.database).await;
    let recording = create_recording(&h.database, channel.id, "Morning News", -5, 3600).await;

    h.scheduler.run_once().await.unwrap();

    assert_eq!(
        status_of(&h.database, recording.id).await,
        RecordingStatus::Recording
    );
    assert_eq!(h.scheduler.active_recording_ids().await, vec![recording.id]);

    let spawned = h.capture.spawned();
    assert_eq!(spawned.len(), 1);
    assert_eq!(spawned[0].url, "http://example.com/stream.m3u8");
    let expected = h
        .recordings_dir
        .join(output_file_name(recording.start_time, "Morning News"));
    assert_eq!(spawned[0].path, expected);
}

#[tokio::test]
async fn test_future_recording_is_not_started() {
    let h = setup().await;
    let channel = create_channel(&h.database).await;
    let recording = create_recording(&h.database, channel.id, "Later", 300, 3900).await;

    h.scheduler.run_once().await.unwrap();

    assert_eq!(
        status_of(&h.database, recording.id).await,
        RecordingStatus::Scheduled
    );
    assert!(h.scheduler.active_recording_ids().await.is_empty());
}

#[tokio::test]
async fn test_launch_failure_leaves_recording_scheduled_and_retries() {
    let h = setup().await;
    let channel = create_channel(&h.database).await;
    let recording = create_recording(&h.database, channel.id, "Flaky", -5, 3600).await;

    h.capture.set_fail_spawn(true);
    h.scheduler.run_once().await.unwrap();
    assert_eq!(
        status_of(&h.database, recording.id).await,
        RecordingStatus::Scheduled
    );
    assert!(h.scheduler.active_recording_ids().await.is_empty());

    // Self-heals on a later tick while the window is still open.
    h.capture.set_fail_spawn(false);
    h.scheduler.run_once().await.unwrap();
    assert_eq!(
        status_of(&h.database, recording.id).await,
        RecordingStatus::Recording
    );
}

#[tokio::test]
async fn test_finished_recording_is_completed_with_file_record() {
    let h = setup().await;
    let channel = create_channel(&h.database).await;
    let recording = create_recording(&h.database, channel.id, "Short Show", -10, 3600).await;

    h.scheduler.run_once().await.unwrap();
    assert_eq!(
        status_of(&h.database, recording.id).await,
        RecordingStatus::Recording
    );

    // Window closes; the capture produced a file on disk.
    let filename = output_file_name(recording.start_time, "Short Show");
    std::fs::write(h.recordings_dir.join(&filename), b"tsdata").unwrap();
    h.database
        .update_recording(
            recording.id,
            &RecordingUpdateRequest {
                title: None,
                start_time: None,
                end_time: Some(Utc::now() - ChronoDuration::seconds(1)),
            },
        )
        .await
        .unwrap();

    h.scheduler.run_once().await.unwrap();

    assert_eq!(
        status_of(&h.database, recording.id).await,
        RecordingStatus::Completed
    );
    assert!(h.scheduler.active_recording_ids().await.is_empty());
    assert!(h.capture.spawned()[0].state.terminated.load(Ordering::SeqCst));

    let file = h
        .database
        .get_recorded_file_for_recording(recording.id)
        .await
        .unwrap()
        .expect("recorded file row");
    assert_eq!(file.file_path, filename);
    assert_eq!(file.file_size, Some(6));
}

#[tokio::test]
async fn test_finished_recording_without_output_file_has_null_size() {
    let h = setup().await;
    let channel = create_channel(&h.database).await;
    let recording = create_recording(&h.database, channel.id, "No Output", -10, 3600).await;

    h.scheduler.run_once().await.unwrap();
    h.database
        .update_recording(
            recording.id,
            &RecordingUpdateRequest {
                title: None,
                start_time: None,
                end_time: Some(Utc::now() - ChronoDuration::seconds(1)),
            },
        )
        .await
        .unwrap();

    h.scheduler.run_once().await.unwrap();

    let file = h
        .database
        .get_recorded_file_for_recording(recording.id)
        .await
        .unwrap()
        .expect("recorded file row");
    assert_eq!(file.file_size, None);
}

#[tokio::test]
async fn test_cancelled_recording_is_stopped_and_keeps_status() {
    let h = setup().await;
    let channel = create_channel(&h.database).await;
    let recording = create_recording(&h.database, channel.id, "Cancelled Show", -5, 3600).await;

    h.scheduler.run_once().await.unwrap();
    assert_eq!(h.scheduler.active_recording_ids().await, vec![recording.id]);

    // Cancellation arrives from the API between ticks.
    h.database
        .update_recording_status(recording.id, RecordingStatus::Cancelled)
        .await
        .unwrap();

    h.scheduler.run_once().await.unwrap();

    assert_eq!(
        status_of(&h.database, recording.id).await,
        RecordingStatus::Cancelled
    );
    assert!(h.scheduler.active_recording_ids().await.is_empty());
    assert!(h.capture.spawned()[0].state.terminated.load(Ordering::SeqCst));
    assert!(h
        .database
        .get_recorded_file_for_recording(recording.id)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_unresponsive_capture_is_killed_after_grace_period() {
    let h = setup().await;
    let channel = create_channel(&h.database).await;
    let recording = create_recording(&h.database, channel.id, "Stubborn", -10, 3600).await;

    // This capture ignores graceful stop requests.
    h.capture.set_ignore_terminate(true);
    h.scheduler.run_once().await.unwrap();
    assert_eq!(h.scheduler.active_recording_ids().await, vec![recording.id]);

    h.database
        .update_recording(
            recording.id,
            &RecordingUpdateRequest {
                title: None,
                start_time: None,
                end_time: Some(Utc::now() - ChronoDuration::seconds(1)),
            },
        )
        .await
        .unwrap();

    h.scheduler.run_once().await.unwrap();

    let state = &h.capture.spawned()[0].state;
    assert!(state.terminated.load(Ordering::SeqCst));
    assert!(state.killed.load(Ordering::SeqCst));
    assert!(!state.running.load(Ordering::SeqCst));
    assert_eq!(
        status_of(&h.database, recording.id).await,
        RecordingStatus::Completed
    );
    assert!(h.scheduler.active_recording_ids().await.is_empty());
}

#[tokio::test]
async fn test_stale_cancelled_rows_are_left_alone() {
    let h = setup().await;
    let channel = create_channel(&h.database).await;
    let live = create_recording(&h.database, channel.id, "Live Cancel", -5, 3600).await;
    let stale = create_recording(&h.database, channel.id, "Old Cancel", -7200, -3600).await;
    h.database
        .update_recording_status(stale.id, RecordingStatus::Cancelled)
        .await
        .unwrap();

    h.scheduler.run_once().await.unwrap();
    assert_eq!(h.scheduler.active_recording_ids().await, vec![live.id]);

    h.database
        .update_recording_status(live.id, RecordingStatus::Cancelled)
        .await
        .unwrap();

    h.scheduler.run_once().await.unwrap();

    // Only the recording with a registered capture was stopped; the stale
    // row keeps its status and never produces a file record.
    assert!(h.scheduler.active_recording_ids().await.is_empty());
    assert!(h.capture.spawned()[0].state.terminated.load(Ordering::SeqCst));
    assert_eq!(
        status_of(&h.database, stale.id).await,
        RecordingStatus::Cancelled
    );
    assert!(h
        .database
        .get_recorded_file_for_recording(stale.id)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_missed_recording_is_failed() {
    let h = setup().await;
    let channel = create_channel(&h.database).await;
    let recording = create_recording(&h.database, channel.id, "Missed", -7200, -3600).await;

    h.scheduler.run_once().await.unwrap();

    assert_eq!(
        status_of(&h.database, recording.id).await,
        RecordingStatus::Failed
    );
    assert!(h.scheduler.active_recording_ids().await.is_empty());
    assert!(h
        .database
        .get_recorded_file_for_recording(recording.id)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_crashed_capture_is_reaped_and_failed() {
    let h = setup().await;
    let channel = create_channel(&h.database).await;
    let recording = create_recording(&h.database, channel.id, "Crashy", -5, 3600).await;

    h.scheduler.run_once().await.unwrap();
    assert_eq!(h.scheduler.active_recording_ids().await, vec![recording.id]);

    // Process dies on its own, well before the scheduled end.
    h.capture.spawned()[0]
        .state
        .running
        .store(false, Ordering::SeqCst);

    h.scheduler.run_once().await.unwrap();

    assert_eq!(
        status_of(&h.database, recording.id).await,
        RecordingStatus::Failed
    );
    assert!(h.scheduler.active_recording_ids().await.is_empty());
}

#[tokio::test]
async fn test_shutdown_stops_all_captures() {
    let h = setup().await;
    let channel = create_channel(&h.database).await;
    create_recording(&h.database, channel.id, "Show A", -5, 3600).await;
    create_recording(&h.database, channel.id, "Show B", -5, 3600).await;

    h.scheduler.run_once().await.unwrap();
    assert_eq!(h.scheduler.active_recording_ids().await.len(), 2);

    h.scheduler.shutdown().await;

    assert!(h.scheduler.active_recording_ids().await.is_empty());
    for record in h.capture.spawned() {
        assert!(!record.state.running.load(Ordering::SeqCst));
    }
}

#[tokio::test]
async fn test_orphan_with_elapsed_window_and_file_is_completed() {
    let h = setup().await;
    let channel = create_channel(&h.database).await;
    let recording = create_recording(&h.database, channel.id, "Orphan Done", -7200, -3600).await;
    h.database
        .update_recording_status(recording.id, RecordingStatus::Recording)
        .await
        .unwrap();

    let filename = output_file_name(recording.start_time, "Orphan Done");
    std::fs::write(h.recordings_dir.join(&filename), b"leftover").unwrap();

    h.scheduler.recover_orphaned_recordings().await.unwrap();

    assert_eq!(
        status_of(&h.database, recording.id).await,
        RecordingStatus::Completed
    );
    let file = h
        .database
        .get_recorded_file_for_recording(recording.id)
        .await
        .unwrap()
        .expect("recorded file row");
    assert_eq!(file.file_path, filename);
    assert_eq!(file.file_size, Some(8));
}

#[tokio::test]
async fn test_orphan_with_open_window_is_failed() {
    let h = setup().await;
    let channel = create_channel(&h.database).await;
    let recording = create_recording(&h.database, channel.id, "Orphan Live", -600, 3600).await;
    h.database
        .update_recording_status(recording.id, RecordingStatus::Recording)
        .await
        .unwrap();

    h.scheduler.recover_orphaned_recordings().await.unwrap();

    assert_eq!(
        status_of(&h.database, recording.id).await,
        RecordingStatus::Failed
    );
    assert!(h
        .database
        .get_recorded_file_for_recording(recording.id)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_start_is_not_duplicated_across_ticks() {
    let h = setup().await;
    let channel = create_channel(&h.database).await;
    let recording = create_recording(&h.database, channel.id, "Steady", -5, 3600).await;

    h.scheduler.run_once().await.unwrap();
    h.scheduler.run_once().await.unwrap();

    assert_eq!(h.capture.spawned().len(), 1);
    assert_eq!(h.scheduler.active_recording_ids().await, vec![recording.id]);
}
