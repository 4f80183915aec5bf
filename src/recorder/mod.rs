//! Screen/audio capture behind a trait.
//!
//! The controller only depends on `Recorder`; the concrete implementation
//! wraps an ffmpeg subprocess with a startup grace window and a graceful
//! quit / bounded wait / kill stop sequence.

pub mod ffmpeg;

pub use ffmpeg::{CaptureProfile, FfmpegRecorder};

use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("capture tool not found in PATH")]
    ToolMissing,
    #[error("capture already running")]
    AlreadyRunning,
    #[error("failed to spawn capture process: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("capture process exited during startup ({0})")]
    ExitedEarly(String),
    #[error("capture produced no output within the grace window")]
    NoOutput,
}

#[async_trait]
pub trait Recorder: Send + Sync {
    /// Whether the capture tool is present at all. Checked before joining
    /// gets as far as starting a capture.
    fn check_available(&self) -> bool;

    /// Spawn the capture writing to `output` and verify it survives the
    /// startup grace window with a non-empty file.
    async fn start(&mut self, output: &Path) -> Result<(), CaptureError>;

    /// Release the capture process: graceful quit, bounded wait, kill on
    /// timeout. Idempotent; stopping with no capture running is a no-op.
    async fn stop(&mut self) -> Result<(), CaptureError>;
}
