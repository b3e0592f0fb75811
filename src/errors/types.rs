//! Error type definitions for the m3u8-recorder application
//!
//! `AppError` covers the request/response and configuration paths;
//! `CaptureError` covers the capture process supervisor. Scheduler passes
//! compose these through `anyhow` at the service boundary.

use thiserror::Error;

/// Top-level application error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Capture process errors
    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),
}

/// Errors raised by the capture process supervisor
#[derive(Error, Debug)]
pub enum CaptureError {
    /// The capture binary could not be launched (missing binary, bad
    /// arguments, resource exhaustion)
    #[error("Failed to launch capture process: {0}")]
    SpawnFailed(#[source] std::io::Error),

    /// Signalling a running capture process failed
    #[error("Failed to signal capture process: {message}")]
    SignalFailed { message: String },

    /// Waiting on a capture process failed
    #[error("Failed to wait on capture process: {0}")]
    WaitFailed(#[source] std::io::Error),
}
