//! Capture process abstraction.
//!
//! The scheduler never talks to ffmpeg directly; it goes through the
//! [`CaptureRunner`] / [`CaptureProcess`] traits so tests can substitute a
//! fake that never spawns an OS process.

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tracing::debug;

use crate::errors::CaptureError;

/// Handle to one live capture child process.
#[async_trait]
pub trait CaptureProcess: Send {
    /// Request graceful termination (SIGTERM on unix). The capture binary
    /// flushes and closes its output file on a graceful stop.
    async fn terminate(&mut self) -> Result<(), CaptureError>;

    /// Forcefully kill the process and wait for it to be reaped.
    async fn kill(&mut self) -> Result<(), CaptureError>;

    /// Wait for the process to exit, reaping it.
    async fn wait(&mut self) -> Result<(), CaptureError>;

    /// Liveness check without blocking.
    fn is_running(&mut self) -> bool;
}

/// Launches capture child processes.
#[async_trait]
pub trait CaptureRunner: Send + Sync {
    /// Spawn a capture of `source_url` into `output_path`, overwriting any
    /// pre-existing file at that path.
    async fn spawn(
        &self,
        source_url: &str,
        output_path: &Path,
    ) -> Result<Box<dyn CaptureProcess>, CaptureError>;
}

/// Real runner shelling out to ffmpeg.
pub struct FfmpegCapture {
    command: String,
}

impl FfmpegCapture {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl CaptureRunner for FfmpegCapture {
    async fn spawn(
        &self,
        source_url: &str,
        output_path: &Path,
    ) -> Result<Box<dyn CaptureProcess>, CaptureError> {
        // Stream copy into an MPEG-TS container, no re-encode. All stdio is
        // discarded: an inherited pipe that is never drained would block the
        // child once the OS buffer fills and silently stall the capture.
        let child = tokio::process::Command::new(&self.command)
            .arg("-y")
            .arg("-i")
            .arg(source_url)
            .arg("-c")
            .arg("copy")
            .arg("-f")
            .arg("mpegts")
            .arg(output_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(CaptureError::SpawnFailed)?;

        debug!(
            "Spawned capture process (pid {:?}) for {}",
            child.id(),
            output_path.display()
        );

        Ok(Box::new(FfmpegProcess { child }))
    }
}

struct FfmpegProcess {
    child: tokio::process::Child,
}

#[async_trait]
impl CaptureProcess for FfmpegProcess {
    async fn terminate(&mut self) -> Result<(), CaptureError> {
        let Some(pid) = self.child.id() else {
            // Already reaped.
            return Ok(());
        };

        #[cfg(unix)]
        {
            // A non-zero exit here means the process is already gone, which
            // is a successful stop from the caller's point of view.
            let _ = tokio::process::Command::new("kill")
                .args(["-TERM", &pid.to_string()])
                .output()
                .await
                .map_err(|e| CaptureError::SignalFailed {
                    message: e.to_string(),
                })?;
            Ok(())
        }

        #[cfg(not(unix))]
        {
            self.child
                .start_kill()
                .map_err(|e| CaptureError::SignalFailed {
                    message: e.to_string(),
                })
        }
    }

    async fn kill(&mut self) -> Result<(), CaptureError> {
        match self.child.kill().await {
            Ok(()) => Ok(()),
            Err(_) if !self.is_running() => Ok(()),
            Err(e) => Err(CaptureError::SignalFailed {
                message: e.to_string(),
            }),
        }
    }

    async fn wait(&mut self) -> Result<(), CaptureError> {
        self.child
            .wait()
            .await
            .map(|_| ())
            .map_err(CaptureError::WaitFailed)
    }

    fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }
}
