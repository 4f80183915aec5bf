//! One-shot recording: join, record until the meeting ends (or Ctrl-C),
//! upload, exit.

use super::args::RecordCliArgs;
use crate::app;
use crate::config::Config;
use crate::controller::{StatusHandle, TerminationReason};
use anyhow::{anyhow, bail, Result};
use std::sync::Arc;
use tracing::warn;

pub async fn handle_record_command(args: RecordCliArgs) -> Result<()> {
    let config = Config::load()?;
    let status = StatusHandle::default();
    let controller = Arc::new(app::build_controller(&config, status.clone())?);

    controller
        .start(&args.meeting_code)
        .await
        .map_err(|e| anyhow!("{e}"))?;
    println!("Recording {}, press Ctrl-C to stop", args.meeting_code);

    let canceller = {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                println!("\nStopping...");
                let _ = controller.stop().await;
            }
        })
    };

    controller.wait().await;
    canceller.abort();

    let state = status.get().await;
    let report = state
        .last_report
        .ok_or_else(|| anyhow!("session ended without a report"))?;

    match report.reason {
        TerminationReason::Completed => {
            let trigger = report
                .stop_trigger
                .map(|t| t.as_str())
                .unwrap_or("unknown");
            println!(
                "Session completed ({trigger}), recorded {}s",
                report.duration_seconds
            );
            if let Some(id) = &report.drive_file_id {
                println!("Uploaded to Drive with ID {id}");
            }
            if let Some(err) = &report.upload_error {
                warn!("Upload failed: {err}");
                if let Some(path) = &report.artifact_path {
                    println!("Recording kept locally at {:?}", path);
                }
            }
            Ok(())
        }
        reason => {
            bail!(
                "Session failed: {}{}",
                reason.as_str(),
                report
                    .error
                    .map(|e| format!(" ({e})"))
                    .unwrap_or_default()
            )
        }
    }
}
