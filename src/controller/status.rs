//! Lifecycle state shared between the controller worker and the front door.

use super::report::SessionReport;
use crate::session::MeetingCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Where the controller is in one session's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    Idle,
    Joining,
    Recording,
    /// Stopping capture, uploading, leaving the meeting.
    Finalizing,
    Terminated,
}

impl SessionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Joining => "joining",
            Self::Recording => "recording",
            Self::Finalizing => "finalizing",
            Self::Terminated => "terminated",
        }
    }
}

/// Machine-readable reason a run reached its terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    Completed,
    JoinFailed,
    RecorderUnavailable,
    RecordingStartFailed,
}

impl TerminationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::JoinFailed => "join_failed",
            Self::RecorderUnavailable => "recorder_unavailable",
            Self::RecordingStartFailed => "recording_start_failed",
        }
    }
}

/// What ended the recording on a completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopTrigger {
    SessionEnded,
    MaxDuration,
    Cancelled,
}

impl StopTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SessionEnded => "session_ended",
            Self::MaxDuration => "max_duration",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Current controller state, readable by API handlers.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub phase: SessionPhase,
    pub code: Option<MeetingCode>,
    pub started_at: Option<DateTime<Utc>>,
    pub output_path: Option<PathBuf>,
    pub reason: Option<TerminationReason>,
    pub last_error: Option<String>,
    pub last_report: Option<SessionReport>,
}

impl Default for SessionPhase {
    fn default() -> Self {
        Self::Idle
    }
}

impl SessionState {
    /// Seconds since recording started.
    pub fn duration_seconds(&self) -> Option<u64> {
        self.started_at.map(|started| {
            let elapsed = Utc::now() - started;
            elapsed.num_seconds().max(0) as u64
        })
    }
}

/// Thread-safe handle for sharing lifecycle state. Mutated only by the
/// controller; the front door reads.
#[derive(Clone, Default)]
pub struct StatusHandle {
    inner: Arc<Mutex<SessionState>>,
}

impl StatusHandle {
    pub async fn get(&self) -> SessionState {
        self.inner.lock().await.clone()
    }

    pub async fn begin_joining(&self, code: MeetingCode) {
        let mut state = self.inner.lock().await;
        *state = SessionState {
            phase: SessionPhase::Joining,
            code: Some(code),
            ..SessionState::default()
        };
    }

    pub async fn begin_recording(&self, output_path: PathBuf) {
        let mut state = self.inner.lock().await;
        state.phase = SessionPhase::Recording;
        state.started_at = Some(Utc::now());
        state.output_path = Some(output_path);
    }

    pub async fn set_phase(&self, phase: SessionPhase) {
        let mut state = self.inner.lock().await;
        state.phase = phase;
    }

    pub async fn terminate(&self, report: SessionReport) {
        let mut state = self.inner.lock().await;
        state.phase = SessionPhase::Terminated;
        state.reason = Some(report.reason);
        state.last_error = report.error.clone().or_else(|| report.upload_error.clone());
        state.last_report = Some(report);
    }
}
