//! Lifecycle controller tests with fake collaborators.
//!
//! Every fake records call counts so the cleanup contract is checkable:
//! whatever ends a run, the browser session is closed exactly once and the
//! capture process is released exactly once. Timing-sensitive tests run on
//! the paused tokio clock.

use async_trait::async_trait;
use meetrec::controller::{
    ControllerSettings, SessionController, SessionPhase, StartRejection, StatusHandle,
    StopRejection, StopTrigger, TerminationReason,
};
use meetrec::recorder::{CaptureError, Recorder};
use meetrec::session::{
    JoinError, MeetingCode, MeetingSession, ProbeOutcome, SessionError, SessionOpener,
};
use meetrec::storage::{ArtifactStore, RemoteFile, UploadError};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Default)]
struct Counts {
    opens: AtomicUsize,
    joins: AtomicUsize,
    probes: AtomicUsize,
    leaves: AtomicUsize,
    closes: AtomicUsize,
    recorder_starts: AtomicUsize,
    recorder_stops: AtomicUsize,
    uploads: AtomicUsize,
}

impl Counts {
    fn get(&self, counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

struct FakeSession {
    counts: Arc<Counts>,
    join_plan: StdMutex<VecDeque<Result<(), ()>>>,
    probe_plan: StdMutex<VecDeque<ProbeOutcome>>,
    hang_join: bool,
}

#[async_trait]
impl MeetingSession for FakeSession {
    async fn join(&mut self) -> Result<(), JoinError> {
        self.counts.joins.fetch_add(1, Ordering::SeqCst);
        if self.hang_join {
            std::future::pending::<()>().await;
        }
        let next = self.join_plan.lock().unwrap().pop_front();
        match next {
            Some(Ok(())) | None => Ok(()),
            Some(Err(())) => Err(JoinError::AdmissionTimeout),
        }
    }

    async fn dismiss_obstruction(&mut self) {}

    async fn probe(&mut self) -> ProbeOutcome {
        self.counts.probes.fetch_add(1, Ordering::SeqCst);
        self.probe_plan
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(ProbeOutcome::Active)
    }

    async fn leave(&mut self) -> Result<(), SessionError> {
        self.counts.leaves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&mut self) {
        self.counts.closes.fetch_add(1, Ordering::SeqCst);
    }
}

struct FakeOpener {
    counts: Arc<Counts>,
    join_plan: Vec<Result<(), ()>>,
    probe_plan: Vec<ProbeOutcome>,
    hang_join: bool,
}

#[async_trait]
impl SessionOpener for FakeOpener {
    async fn open(&self, _code: &MeetingCode) -> Result<Box<dyn MeetingSession>, JoinError> {
        self.counts.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            counts: Arc::clone(&self.counts),
            join_plan: StdMutex::new(self.join_plan.clone().into()),
            probe_plan: StdMutex::new(self.probe_plan.clone().into()),
            hang_join: self.hang_join,
        }))
    }
}

struct FakeRecorder {
    counts: Arc<Counts>,
    available: bool,
    fail_start: bool,
}

#[async_trait]
impl Recorder for FakeRecorder {
    fn check_available(&self) -> bool {
        self.available
    }

    async fn start(&mut self, output: &Path) -> Result<(), CaptureError> {
        self.counts.recorder_starts.fetch_add(1, Ordering::SeqCst);
        if self.fail_start {
            return Err(CaptureError::NoOutput);
        }
        std::fs::write(output, b"fake recording data").map_err(CaptureError::Spawn)?;
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), CaptureError> {
        self.counts.recorder_stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct FakeStore {
    counts: Arc<Counts>,
    fail: bool,
}

#[async_trait]
impl ArtifactStore for FakeStore {
    async fn upload(
        &self,
        _path: &Path,
        _folder_id: Option<&str>,
    ) -> Result<RemoteFile, UploadError> {
        self.counts.uploads.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            Err(UploadError::Request("simulated outage".to_string()))
        } else {
            Ok(RemoteFile {
                id: "remote-1".to_string(),
                name: None,
            })
        }
    }
}

struct Harness {
    controller: SessionController,
    status: StatusHandle,
    counts: Arc<Counts>,
    tempdir: tempfile::TempDir,
}

struct HarnessBuilder {
    join_plan: Vec<Result<(), ()>>,
    probe_plan: Vec<ProbeOutcome>,
    hang_join: bool,
    recorder_available: bool,
    fail_recorder_start: bool,
    fail_upload: bool,
    keep_local_files: bool,
    max_duration: Duration,
}

impl Default for HarnessBuilder {
    fn default() -> Self {
        Self {
            join_plan: Vec::new(),
            probe_plan: Vec::new(),
            hang_join: false,
            recorder_available: true,
            fail_recorder_start: false,
            fail_upload: false,
            keep_local_files: true,
            max_duration: Duration::from_secs(14400),
        }
    }
}

impl HarnessBuilder {
    fn build(self) -> Harness {
        let tempdir = tempfile::tempdir().unwrap();
        let counts = Arc::new(Counts::default());
        let status = StatusHandle::default();

        let opener = Arc::new(FakeOpener {
            counts: Arc::clone(&counts),
            join_plan: self.join_plan,
            probe_plan: self.probe_plan,
            hang_join: self.hang_join,
        });
        let recorder: Box<dyn Recorder> = Box::new(FakeRecorder {
            counts: Arc::clone(&counts),
            available: self.recorder_available,
            fail_start: self.fail_recorder_start,
        });
        let store = Arc::new(FakeStore {
            counts: Arc::clone(&counts),
            fail: self.fail_upload,
        });

        let settings = ControllerSettings {
            join_attempts: 3,
            join_timeout: Duration::from_secs(60),
            join_backoff: Duration::from_secs(5),
            probe_interval: Duration::from_secs(30),
            max_duration: self.max_duration,
            recordings_dir: tempdir.path().to_path_buf(),
            folder_id: None,
            keep_local_files: self.keep_local_files,
        };

        let controller = SessionController::new(
            opener,
            Arc::new(Mutex::new(recorder)),
            store,
            None,
            settings,
            status.clone(),
        );

        Harness {
            controller,
            status,
            counts,
            tempdir,
        }
    }
}

const CODE: &str = "abc-defg-hij";

#[tokio::test(start_paused = true)]
async fn completes_when_probe_reports_session_ended() {
    let harness = HarnessBuilder {
        probe_plan: vec![ProbeOutcome::Ended, ProbeOutcome::Ended],
        ..Default::default()
    }
    .build();

    harness.controller.start(CODE).await.unwrap();
    harness.controller.wait().await;

    let state = harness.status.get().await;
    assert_eq!(state.phase, SessionPhase::Terminated);
    assert_eq!(state.reason, Some(TerminationReason::Completed));

    let report = state.last_report.unwrap();
    assert_eq!(report.stop_trigger, Some(StopTrigger::SessionEnded));
    assert!(report.drive_file_id.is_some());
    assert!(report.upload_error.is_none());

    let counts = &harness.counts;
    assert_eq!(counts.get(&counts.opens), 1);
    assert_eq!(counts.get(&counts.joins), 1);
    assert_eq!(counts.get(&counts.recorder_starts), 1);
    assert_eq!(counts.get(&counts.recorder_stops), 1);
    assert_eq!(counts.get(&counts.uploads), 1);
    assert_eq!(counts.get(&counts.leaves), 1);
    assert_eq!(counts.get(&counts.closes), 1);

    // keep_local_files is set, so the artifact survives.
    assert!(report.artifact_path.unwrap().exists());
}

#[tokio::test]
async fn invalid_code_rejected_without_side_effects() {
    let harness = HarnessBuilder::default().build();

    let err = harness.controller.start("ABCDEFG").await.unwrap_err();
    assert!(matches!(err, StartRejection::InvalidCode(_)));

    let state = harness.status.get().await;
    assert_eq!(state.phase, SessionPhase::Idle);
    assert_eq!(harness.counts.get(&harness.counts.opens), 0);
}

#[tokio::test(start_paused = true)]
async fn start_while_running_is_rejected_without_state_mutation() {
    let harness = HarnessBuilder::default().build();

    harness.controller.start(CODE).await.unwrap();
    let err = harness.controller.start("xyz-wxyz-abc").await.unwrap_err();
    assert!(matches!(err, StartRejection::AlreadyRunning));

    let state = harness.status.get().await;
    assert_eq!(state.code.unwrap().as_str(), CODE);
    assert_eq!(harness.counts.get(&harness.counts.opens), 1);

    harness.controller.stop().await.unwrap();
    harness.controller.wait().await;
}

#[tokio::test(start_paused = true)]
async fn join_failure_exhausts_bounded_attempts() {
    let harness = HarnessBuilder {
        join_plan: vec![Err(()), Err(()), Err(())],
        ..Default::default()
    }
    .build();

    harness.controller.start(CODE).await.unwrap();
    harness.controller.wait().await;

    let state = harness.status.get().await;
    assert_eq!(state.reason, Some(TerminationReason::JoinFailed));
    assert!(state.last_error.is_some());

    let counts = &harness.counts;
    assert_eq!(counts.get(&counts.joins), 3);
    assert_eq!(counts.get(&counts.closes), 1);
    assert_eq!(counts.get(&counts.recorder_starts), 0);
    assert_eq!(counts.get(&counts.uploads), 0);
}

#[tokio::test(start_paused = true)]
async fn hanging_join_is_bounded_by_timeout_and_backoff() {
    let harness = HarnessBuilder {
        hang_join: true,
        ..Default::default()
    }
    .build();

    let before = tokio::time::Instant::now();
    harness.controller.start(CODE).await.unwrap();
    harness.controller.wait().await;
    let elapsed = before.elapsed();

    // 3 attempts x 60s timeout + 2 x 5s backoff.
    assert!(elapsed >= Duration::from_secs(190), "elapsed {elapsed:?}");
    assert!(elapsed <= Duration::from_secs(195), "elapsed {elapsed:?}");

    let state = harness.status.get().await;
    assert_eq!(state.reason, Some(TerminationReason::JoinFailed));
    assert_eq!(harness.counts.get(&harness.counts.joins), 3);
    assert_eq!(harness.counts.get(&harness.counts.closes), 1);
}

#[tokio::test(start_paused = true)]
async fn missing_capture_tool_cleans_up_session() {
    let harness = HarnessBuilder {
        recorder_available: false,
        ..Default::default()
    }
    .build();

    harness.controller.start(CODE).await.unwrap();
    harness.controller.wait().await;

    let state = harness.status.get().await;
    assert_eq!(state.reason, Some(TerminationReason::RecorderUnavailable));

    let counts = &harness.counts;
    assert_eq!(counts.get(&counts.recorder_starts), 0);
    assert_eq!(counts.get(&counts.leaves), 1);
    assert_eq!(counts.get(&counts.closes), 1);
    assert_eq!(counts.get(&counts.uploads), 0);
}

#[tokio::test(start_paused = true)]
async fn capture_start_failure_cleans_up_session() {
    let harness = HarnessBuilder {
        fail_recorder_start: true,
        ..Default::default()
    }
    .build();

    harness.controller.start(CODE).await.unwrap();
    harness.controller.wait().await;

    let state = harness.status.get().await;
    assert_eq!(state.reason, Some(TerminationReason::RecordingStartFailed));

    let counts = &harness.counts;
    assert_eq!(counts.get(&counts.recorder_starts), 1);
    assert_eq!(counts.get(&counts.leaves), 1);
    assert_eq!(counts.get(&counts.closes), 1);
    assert_eq!(counts.get(&counts.uploads), 0);
}

#[tokio::test(start_paused = true)]
async fn max_duration_stops_a_perpetually_active_session() {
    let harness = HarnessBuilder {
        // Probe plan empty: every probe reports active.
        max_duration: Duration::from_secs(100),
        ..Default::default()
    }
    .build();

    harness.controller.start(CODE).await.unwrap();
    harness.controller.wait().await;

    let state = harness.status.get().await;
    assert_eq!(state.reason, Some(TerminationReason::Completed));

    let report = state.last_report.unwrap();
    assert_eq!(report.stop_trigger, Some(StopTrigger::MaxDuration));

    let counts = &harness.counts;
    assert!(counts.get(&counts.probes) >= 3);
    assert_eq!(counts.get(&counts.recorder_stops), 1);
    assert_eq!(counts.get(&counts.uploads), 1);
    assert_eq!(counts.get(&counts.closes), 1);
}

#[tokio::test(start_paused = true)]
async fn single_negative_probe_is_debounced() {
    let harness = HarnessBuilder {
        probe_plan: vec![
            ProbeOutcome::Ended,
            ProbeOutcome::Active,
            ProbeOutcome::Ambiguous,
            ProbeOutcome::Ended,
        ],
        ..Default::default()
    }
    .build();

    harness.controller.start(CODE).await.unwrap();
    harness.controller.wait().await;

    let state = harness.status.get().await;
    let report = state.last_report.unwrap();
    assert_eq!(report.stop_trigger, Some(StopTrigger::SessionEnded));

    // The lone negative at tick 1 did not stop the run; it took the two
    // consecutive negatives at ticks 3 and 4.
    assert_eq!(harness.counts.get(&harness.counts.probes), 4);
}

#[tokio::test(start_paused = true)]
async fn cancel_mid_recording_takes_the_cleanup_path() {
    let harness = HarnessBuilder::default().build();

    harness.controller.start(CODE).await.unwrap();

    // Let a few probe ticks pass, then cancel.
    tokio::time::sleep(Duration::from_secs(95)).await;
    harness.controller.stop().await.unwrap();
    harness.controller.wait().await;

    let state = harness.status.get().await;
    assert_eq!(state.reason, Some(TerminationReason::Completed));

    let report = state.last_report.unwrap();
    assert_eq!(report.stop_trigger, Some(StopTrigger::Cancelled));

    let counts = &harness.counts;
    assert_eq!(counts.get(&counts.recorder_stops), 1);
    assert_eq!(counts.get(&counts.uploads), 1);
    assert_eq!(counts.get(&counts.leaves), 1);
    assert_eq!(counts.get(&counts.closes), 1);
}

#[tokio::test(start_paused = true)]
async fn cancel_during_join_closes_session_without_recording() {
    let harness = HarnessBuilder {
        hang_join: true,
        ..Default::default()
    }
    .build();

    harness.controller.start(CODE).await.unwrap();
    tokio::time::sleep(Duration::from_secs(10)).await;
    harness.controller.stop().await.unwrap();
    harness.controller.wait().await;

    let state = harness.status.get().await;
    assert_eq!(state.reason, Some(TerminationReason::Completed));

    let report = state.last_report.unwrap();
    assert_eq!(report.stop_trigger, Some(StopTrigger::Cancelled));
    assert!(report.artifact_path.is_none());

    let counts = &harness.counts;
    assert_eq!(counts.get(&counts.closes), 1);
    assert_eq!(counts.get(&counts.recorder_starts), 0);
    assert_eq!(counts.get(&counts.uploads), 0);
}

#[tokio::test(start_paused = true)]
async fn upload_failure_still_terminates_completed() {
    let harness = HarnessBuilder {
        probe_plan: vec![ProbeOutcome::Ended, ProbeOutcome::Ended],
        fail_upload: true,
        ..Default::default()
    }
    .build();

    harness.controller.start(CODE).await.unwrap();
    harness.controller.wait().await;

    let state = harness.status.get().await;
    assert_eq!(state.phase, SessionPhase::Terminated);
    assert_eq!(state.reason, Some(TerminationReason::Completed));

    let report = state.last_report.unwrap();
    assert_eq!(report.stop_trigger, Some(StopTrigger::SessionEnded));
    assert!(report.drive_file_id.is_none());
    assert!(report.upload_error.is_some());

    assert_eq!(harness.counts.get(&harness.counts.uploads), 1);
    assert_eq!(harness.counts.get(&harness.counts.closes), 1);
}

#[tokio::test(start_paused = true)]
async fn local_artifact_removed_after_successful_upload() {
    let harness = HarnessBuilder {
        probe_plan: vec![ProbeOutcome::Ended, ProbeOutcome::Ended],
        keep_local_files: false,
        ..Default::default()
    }
    .build();

    harness.controller.start(CODE).await.unwrap();
    harness.controller.wait().await;

    let state = harness.status.get().await;
    let report = state.last_report.unwrap();
    assert!(report.drive_file_id.is_some());
    assert!(!report.artifact_path.unwrap().exists());
}

#[tokio::test(start_paused = true)]
async fn local_artifact_kept_when_upload_fails() {
    let harness = HarnessBuilder {
        probe_plan: vec![ProbeOutcome::Ended, ProbeOutcome::Ended],
        keep_local_files: false,
        fail_upload: true,
        ..Default::default()
    }
    .build();

    harness.controller.start(CODE).await.unwrap();
    harness.controller.wait().await;

    let state = harness.status.get().await;
    let report = state.last_report.unwrap();
    assert!(report.upload_error.is_some());
    assert!(report.artifact_path.unwrap().exists());
}

#[tokio::test]
async fn stop_when_idle_is_rejected() {
    let harness = HarnessBuilder::default().build();

    let err = harness.controller.stop().await.unwrap_err();
    assert!(matches!(err, StopRejection::NotRunning));
}

#[tokio::test(start_paused = true)]
async fn controller_accepts_a_new_start_after_termination() {
    let harness = HarnessBuilder {
        probe_plan: vec![ProbeOutcome::Ended, ProbeOutcome::Ended],
        ..Default::default()
    }
    .build();

    harness.controller.start(CODE).await.unwrap();
    harness.controller.wait().await;
    assert_eq!(
        harness.status.get().await.phase,
        SessionPhase::Terminated
    );

    harness.controller.start(CODE).await.unwrap();
    harness.controller.wait().await;

    assert_eq!(harness.counts.get(&harness.counts.opens), 2);
    assert_eq!(harness.counts.get(&harness.counts.closes), 2);

    drop(harness.tempdir);
}
