//! Error types for the m3u8-recorder application

pub mod types;

pub use types::{AppError, CaptureError};
