//! Terminal summary of one session run.

use super::status::{StopTrigger, TerminationReason};
use crate::session::MeetingCode;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub code: MeetingCode,
    pub reason: TerminationReason,
    /// Present on completed runs; what ended the recording.
    pub stop_trigger: Option<StopTrigger>,
    pub artifact_path: Option<PathBuf>,
    pub artifact_bytes: Option<u64>,
    pub drive_file_id: Option<String>,
    /// Retained, never escalated: the run still terminates `Completed`.
    pub upload_error: Option<String>,
    /// Failure detail for non-completed terminal reasons.
    pub error: Option<String>,
    pub duration_seconds: u64,
}

impl SessionReport {
    /// A run that never reached recording.
    pub fn failure(code: &MeetingCode, reason: TerminationReason, error: Option<String>) -> Self {
        Self {
            code: code.clone(),
            reason,
            stop_trigger: None,
            artifact_path: None,
            artifact_bytes: None,
            drive_file_id: None,
            upload_error: None,
            error,
            duration_seconds: 0,
        }
    }
}

/// Where terminal reports go after a run (history table in the service;
/// fakes in tests).
pub trait ReportSink: Send + Sync {
    fn record(&self, report: &SessionReport);
}
