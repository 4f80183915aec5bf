//! The session lifecycle state machine.
//!
//! One controller drives at most one session at a time. `start` validates
//! and spawns a worker task; the worker owns the browser session and the
//! capture subprocess and funnels every exit through a single finalize
//! routine, so neither can be left orphaned no matter which condition
//! ended the run.

use super::report::{ReportSink, SessionReport};
use super::status::{SessionPhase, SessionState, StatusHandle, StopTrigger, TerminationReason};
use crate::recorder::{CaptureError, Recorder};
use crate::session::{CodeError, MeetingCode, MeetingSession, ProbeOutcome, SessionOpener};
use crate::storage::ArtifactStore;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Consecutive non-active probes required before recording stops. One
/// flaky probe must not end a live meeting.
const PROBE_MISS_LIMIT: u32 = 2;

#[derive(Debug, Error)]
pub enum StartRejection {
    #[error(transparent)]
    InvalidCode(#[from] CodeError),
    #[error("a session is already running")]
    AlreadyRunning,
}

#[derive(Debug, Error)]
pub enum StopRejection {
    #[error("no session in progress")]
    NotRunning,
}

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub join_attempts: u32,
    pub join_timeout: Duration,
    pub join_backoff: Duration,
    pub probe_interval: Duration,
    pub max_duration: Duration,
    pub recordings_dir: PathBuf,
    pub folder_id: Option<String>,
    pub keep_local_files: bool,
}

pub struct SessionController {
    opener: Arc<dyn SessionOpener>,
    recorder: Arc<Mutex<Box<dyn Recorder>>>,
    store: Arc<dyn ArtifactStore>,
    sink: Option<Arc<dyn ReportSink>>,
    settings: ControllerSettings,
    status: StatusHandle,
    cancel: Mutex<Option<CancellationToken>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SessionController {
    pub fn new(
        opener: Arc<dyn SessionOpener>,
        recorder: Arc<Mutex<Box<dyn Recorder>>>,
        store: Arc<dyn ArtifactStore>,
        sink: Option<Arc<dyn ReportSink>>,
        settings: ControllerSettings,
        status: StatusHandle,
    ) -> Self {
        Self {
            opener,
            recorder,
            store,
            sink,
            settings,
            status,
            cancel: Mutex::new(None),
            worker: Mutex::new(None),
        }
    }

    /// Validate the code and launch the session worker. Rejection happens
    /// before any side effect: an invalid code or a busy controller leaves
    /// everything untouched.
    pub async fn start(&self, raw_code: &str) -> Result<MeetingCode, StartRejection> {
        let code = MeetingCode::parse(raw_code)?;

        let mut worker = self.worker.lock().await;
        if let Some(handle) = worker.as_ref() {
            if !handle.is_finished() {
                return Err(StartRejection::AlreadyRunning);
            }
        }

        let cancel = CancellationToken::new();
        *self.cancel.lock().await = Some(cancel.clone());
        self.status.begin_joining(code.clone()).await;

        let runner = Runner {
            opener: Arc::clone(&self.opener),
            recorder: Arc::clone(&self.recorder),
            store: Arc::clone(&self.store),
            sink: self.sink.clone(),
            settings: self.settings.clone(),
            status: self.status.clone(),
            cancel,
            code: code.clone(),
        };
        *worker = Some(tokio::spawn(runner.run()));

        info!("Session worker started for {code}");
        Ok(code)
    }

    /// Request cancellation of the active run. The worker finishes its
    /// finalize pass on its own; `wait` observes completion.
    pub async fn stop(&self) -> Result<(), StopRejection> {
        let worker = self.worker.lock().await;
        let active = worker
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false);
        if !active {
            return Err(StopRejection::NotRunning);
        }

        if let Some(cancel) = self.cancel.lock().await.as_ref() {
            info!("Stop requested, cancelling session worker");
            cancel.cancel();
            Ok(())
        } else {
            Err(StopRejection::NotRunning)
        }
    }

    pub async fn status(&self) -> SessionState {
        self.status.get().await
    }

    /// Wait for the active worker (if any) to finish.
    pub async fn wait(&self) {
        let handle = self.worker.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Session worker panicked: {e}");
            }
        }
    }
}

/// Everything one run needs, moved onto the worker task.
struct Runner {
    opener: Arc<dyn SessionOpener>,
    recorder: Arc<Mutex<Box<dyn Recorder>>>,
    store: Arc<dyn ArtifactStore>,
    sink: Option<Arc<dyn ReportSink>>,
    settings: ControllerSettings,
    status: StatusHandle,
    cancel: CancellationToken,
    code: MeetingCode,
}

impl Runner {
    async fn run(self) {
        let report = self.drive().await;
        info!(
            reason = report.reason.as_str(),
            trigger = report.stop_trigger.map(|t| t.as_str()).unwrap_or("-"),
            "Session terminated"
        );
        if let Some(sink) = &self.sink {
            sink.record(&report);
        }
        self.status.terminate(report).await;
    }

    async fn drive(&self) -> SessionReport {
        let mut session = match self.opener.open(&self.code).await {
            Ok(session) => session,
            Err(e) => {
                error!("Failed to open browser session: {e}");
                return SessionReport::failure(
                    &self.code,
                    TerminationReason::JoinFailed,
                    Some(e.to_string()),
                );
            }
        };

        let mut joined = false;
        let mut cancelled = false;
        let mut last_join_error = None;

        for attempt in 1..=self.settings.join_attempts {
            info!(
                attempt,
                total = self.settings.join_attempts,
                "Joining meeting {}",
                self.code
            );
            tokio::select! {
                _ = self.cancel.cancelled() => cancelled = true,
                outcome = tokio::time::timeout(self.settings.join_timeout, session.join()) => {
                    match outcome {
                        Ok(Ok(())) => joined = true,
                        Ok(Err(e)) => {
                            warn!("Join attempt {attempt} failed: {e}");
                            last_join_error = Some(e.to_string());
                        }
                        Err(_) => {
                            warn!("Join attempt {attempt} timed out");
                            last_join_error = Some("join attempt timed out".to_string());
                        }
                    }
                }
            }
            if joined || cancelled {
                break;
            }
            if attempt < self.settings.join_attempts {
                session.dismiss_obstruction().await;
                tokio::select! {
                    _ = self.cancel.cancelled() => cancelled = true,
                    _ = tokio::time::sleep(self.settings.join_backoff) => {}
                }
                if cancelled {
                    break;
                }
            }
        }

        if cancelled {
            info!("Cancelled before recording started");
            return self.finalize(session, None, None, StopTrigger::Cancelled).await;
        }
        if !joined {
            error!("Exhausted all join attempts for {}", self.code);
            session.close().await;
            return SessionReport::failure(
                &self.code,
                TerminationReason::JoinFailed,
                last_join_error,
            );
        }

        if !self.recorder.lock().await.check_available() {
            error!("Capture tool unavailable, leaving meeting");
            return self
                .abandon(session, TerminationReason::RecorderUnavailable, None)
                .await;
        }

        let output_path = self.settings.recordings_dir.join(format!(
            "meeting_{}.mp4",
            chrono::Local::now().format("%Y%m%d_%H%M%S")
        ));
        if let Err(e) = tokio::fs::create_dir_all(&self.settings.recordings_dir).await {
            error!("Cannot create recordings directory: {e}");
            return self
                .abandon(
                    session,
                    TerminationReason::RecordingStartFailed,
                    Some(e.to_string()),
                )
                .await;
        }

        if let Err(e) = self.recorder.lock().await.start(&output_path).await {
            error!("Failed to start capture: {e}");
            let reason = match e {
                CaptureError::ToolMissing => TerminationReason::RecorderUnavailable,
                _ => TerminationReason::RecordingStartFailed,
            };
            return self.abandon(session, reason, Some(e.to_string())).await;
        }

        self.status.begin_recording(output_path.clone()).await;
        info!("Recording to {:?}", output_path);

        let recording_started = tokio::time::Instant::now();
        let mut misses = 0u32;
        let trigger = loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break StopTrigger::Cancelled,
                _ = tokio::time::sleep(self.settings.probe_interval) => {}
            }
            if recording_started.elapsed() >= self.settings.max_duration {
                info!("Max recording duration reached");
                break StopTrigger::MaxDuration;
            }
            match session.probe().await {
                ProbeOutcome::Active => misses = 0,
                outcome => {
                    misses += 1;
                    debug!(?outcome, misses, "non-active liveness probe");
                    if misses >= PROBE_MISS_LIMIT {
                        info!("Meeting no longer active");
                        break StopTrigger::SessionEnded;
                    }
                }
            }
        };

        self.finalize(session, Some(output_path), Some(recording_started), trigger)
            .await
    }

    /// Terminal failure after join but before recording: leave, close,
    /// report.
    async fn abandon(
        &self,
        mut session: Box<dyn MeetingSession>,
        reason: TerminationReason,
        error: Option<String>,
    ) -> SessionReport {
        if let Err(e) = session.leave().await {
            warn!("Failed to leave meeting: {e}");
        }
        session.close().await;
        SessionReport::failure(&self.code, reason, error)
    }

    /// The one exit path for everything that got past joining. Each cleanup
    /// step is independent: a failure is logged and the rest still runs.
    async fn finalize(
        &self,
        mut session: Box<dyn MeetingSession>,
        output: Option<PathBuf>,
        recording_started: Option<tokio::time::Instant>,
        trigger: StopTrigger,
    ) -> SessionReport {
        self.status.set_phase(SessionPhase::Finalizing).await;

        if output.is_some() {
            if let Err(e) = self.recorder.lock().await.stop().await {
                warn!("Failed to stop capture cleanly: {e}");
            }
        }

        let mut artifact_bytes = None;
        let mut drive_file_id = None;
        let mut upload_error = None;
        if let Some(path) = &output {
            let len = tokio::fs::metadata(path)
                .await
                .map(|meta| meta.len())
                .unwrap_or(0);
            artifact_bytes = Some(len);
            if len > 0 {
                match self
                    .store
                    .upload(path, self.settings.folder_id.as_deref())
                    .await
                {
                    Ok(remote) => {
                        info!("Artifact uploaded with ID {}", remote.id);
                        drive_file_id = Some(remote.id);
                    }
                    Err(e) => {
                        error!("Upload failed: {e}");
                        upload_error = Some(e.to_string());
                    }
                }
            } else {
                warn!("No valid artifact to upload");
            }
        }

        if let Err(e) = session.leave().await {
            warn!("Failed to leave meeting: {e}");
        }
        session.close().await;

        if let Some(path) = &output {
            if drive_file_id.is_some() && !self.settings.keep_local_files {
                match tokio::fs::remove_file(path).await {
                    Ok(()) => info!("Removed local artifact {:?}", path),
                    Err(e) => warn!("Failed to remove local artifact: {e}"),
                }
            }
        }

        SessionReport {
            code: self.code.clone(),
            reason: TerminationReason::Completed,
            stop_trigger: Some(trigger),
            artifact_path: output,
            artifact_bytes,
            drive_file_id,
            upload_error,
            error: None,
            duration_seconds: recording_started
                .map(|started| started.elapsed().as_secs())
                .unwrap_or(0),
        }
    }
}
