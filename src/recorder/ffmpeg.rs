//! ffmpeg capture subprocess management.

use super::{CaptureError, Recorder};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// Capture backend per platform family. Selecting one is a static
/// command-template lookup; nothing downstream depends on the choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureProfile {
    /// X11 display grab with default PulseAudio input.
    X11Grab,
    /// macOS AVFoundation screen + default audio device.
    AvFoundation,
    /// Windows desktop grab.
    GdiGrab,
}

impl CaptureProfile {
    pub fn for_host() -> Self {
        if cfg!(target_os = "macos") {
            Self::AvFoundation
        } else if cfg!(target_os = "windows") {
            Self::GdiGrab
        } else {
            Self::X11Grab
        }
    }

    fn args(&self, output: &Path) -> Vec<String> {
        let mut args: Vec<String> = match self {
            Self::X11Grab => [
                "-y", "-f", "x11grab", "-s", "1920x1080", "-i", ":0.0", "-f", "pulse", "-i",
                "default", "-c:v", "libx264", "-c:a", "aac",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            Self::AvFoundation => [
                "-y", "-f", "avfoundation", "-i", "1:0", "-c:v", "libx264", "-c:a", "aac", "-vf",
                "scale=1280:720", "-r", "30",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            Self::GdiGrab => [
                "-y", "-f", "gdigrab", "-i", "desktop", "-c:v", "libx264", "-c:a", "aac",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        };
        args.push(output.to_string_lossy().into_owned());
        args
    }
}

pub struct FfmpegRecorder {
    command: String,
    profile: CaptureProfile,
    start_grace: Duration,
    stop_timeout: Duration,
    child: Option<Child>,
}

impl FfmpegRecorder {
    pub fn new(profile: CaptureProfile, start_grace: Duration, stop_timeout: Duration) -> Self {
        Self {
            command: "ffmpeg".to_string(),
            profile,
            start_grace,
            stop_timeout,
            child: None,
        }
    }

    #[cfg(test)]
    fn with_command(mut self, command: &str) -> Self {
        self.command = command.to_string();
        self
    }
}

#[async_trait]
impl Recorder for FfmpegRecorder {
    fn check_available(&self) -> bool {
        which::which(&self.command).is_ok()
    }

    async fn start(&mut self, output: &Path) -> Result<(), CaptureError> {
        if self.child.is_some() {
            return Err(CaptureError::AlreadyRunning);
        }
        if !self.check_available() {
            return Err(CaptureError::ToolMissing);
        }

        info!("Launching {} -> {:?}", self.command, output);
        let mut child = Command::new(&self.command)
            .args(self.profile.args(output))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(CaptureError::Spawn)?;

        tokio::time::sleep(self.start_grace).await;

        // The process must still be running and writing frames by now.
        match child.try_wait() {
            Ok(Some(status)) => return Err(CaptureError::ExitedEarly(status.to_string())),
            Ok(None) => {}
            Err(e) => {
                let _ = child.start_kill();
                return Err(CaptureError::Spawn(e));
            }
        }

        let wrote_output = tokio::fs::metadata(output)
            .await
            .map(|meta| meta.len() > 0)
            .unwrap_or(false);
        if !wrote_output {
            warn!("capture started but produced no output, terminating");
            let _ = child.start_kill();
            let _ = child.wait().await;
            return Err(CaptureError::NoOutput);
        }

        info!("Recording started");
        self.child = Some(child);
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), CaptureError> {
        let mut child = match self.child.take() {
            Some(child) => child,
            None => {
                debug!("no capture in progress");
                return Ok(());
            }
        };

        info!("Stopping capture");
        // ffmpeg finalizes the container on 'q'; dropping stdin signals EOF
        // as a fallback.
        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(b"q\n").await {
                debug!("could not send quit to capture stdin: {e}");
            }
        }

        match tokio::time::timeout(self.stop_timeout, child.wait()).await {
            Ok(Ok(status)) => info!("Capture exited with {status}"),
            Ok(Err(e)) => warn!("error waiting for capture exit: {e}"),
            Err(_) => {
                warn!(
                    "capture did not exit within {}s, killing it",
                    self.stop_timeout.as_secs()
                );
                if let Err(e) = child.kill().await {
                    warn!("failed to kill capture process: {e}");
                }
            }
        }
        Ok(())
    }
}
