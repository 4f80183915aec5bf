//! Service wiring and lifecycle.

use crate::api::ApiServer;
use crate::config::Config;
use crate::controller::{ControllerSettings, SessionController, StatusHandle};
use crate::db::SqliteReportSink;
use crate::global;
use crate::recorder::{CaptureProfile, FfmpegRecorder, Recorder};
use crate::session::MeetSessionOpener;
use crate::storage::DriveStore;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info};

pub async fn run_service() -> Result<()> {
    info!("Starting meetrec service");

    let config = Config::load()?;
    let status = StatusHandle::default();
    let controller = Arc::new(build_controller(&config, status)?);

    let api_server = ApiServer::new(Arc::clone(&controller), config.server.port);
    tokio::spawn(async move {
        if let Err(e) = api_server.start().await {
            error!("API server failed: {}", e);
        }
    });

    info!("meetrec is ready!");
    info!(
        "Start a recording: curl -X POST http://127.0.0.1:{}/start \
         -H 'Content-Type: application/json' -d '{{\"meeting_code\":\"abc-defg-hij\"}}'",
        config.server.port
    );

    wait_for_shutdown().await?;

    // Shutdown takes the same path as an operator stop: cancel the active
    // run and let its finalize pass release the browser and the capture
    // process before the process exits.
    if controller.stop().await.is_ok() {
        info!("Waiting for active session to finalize");
    }
    controller.wait().await;

    info!("meetrec stopped");
    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
            _ = sigterm.recv() => info!("Received SIGTERM"),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received interrupt");
    }
    Ok(())
}

/// Assemble a controller from config: Meet opener, ffmpeg recorder, Drive
/// store, sqlite history sink.
pub fn build_controller(config: &Config, status: StatusHandle) -> Result<SessionController> {
    let opener = Arc::new(MeetSessionOpener::new(
        config.session.chromedriver_path.clone(),
        config.session.display_name.clone(),
        Duration::from_secs(config.session.join_timeout_seconds),
    ));

    let recorder: Box<dyn Recorder> = Box::new(FfmpegRecorder::new(
        CaptureProfile::for_host(),
        Duration::from_secs(config.recording.start_grace_seconds),
        Duration::from_secs(config.recording.stop_timeout_seconds),
    ));

    let store = Arc::new(DriveStore::new(global::token_file()?));

    let recordings_dir = match &config.recording.output_dir {
        Some(dir) => dir.clone(),
        None => global::recordings_dir()?,
    };

    let settings = ControllerSettings {
        join_attempts: config.session.join_attempts,
        join_timeout: Duration::from_secs(config.session.join_timeout_seconds),
        join_backoff: Duration::from_secs(config.session.join_backoff_seconds),
        probe_interval: Duration::from_secs(config.recording.probe_interval_seconds),
        max_duration: Duration::from_secs(config.recording.max_duration_seconds),
        recordings_dir,
        folder_id: (!config.storage.folder_id.is_empty())
            .then(|| config.storage.folder_id.clone()),
        keep_local_files: config.recording.keep_local_files,
    };

    Ok(SessionController::new(
        opener,
        Arc::new(Mutex::new(recorder)),
        store,
        Some(Arc::new(SqliteReportSink)),
        settings,
        status,
    ))
}
