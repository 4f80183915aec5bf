//! Session control endpoints.
//!
//! - `POST /start` - begin recording a meeting
//! - `POST /stop` - cancel the active session
//! - `GET  /status` - current lifecycle state

use crate::controller::{SessionController, SessionPhase, StartRejection, StopRejection};
use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub struct SessionApiState {
    pub controller: Arc<SessionController>,
}

#[derive(Debug, serde::Deserialize)]
pub struct StartRequest {
    pub meeting_code: String,
}

pub fn router(state: SessionApiState) -> Router {
    Router::new()
        .route("/start", post(start_session))
        .route("/stop", post(stop_session))
        .route("/status", get(session_status))
        .with_state(state)
}

async fn start_session(
    State(state): State<SessionApiState>,
    Json(request): Json<StartRequest>,
) -> (StatusCode, Json<Value>) {
    info!("Start command received via API");

    match state.controller.start(&request.meeting_code).await {
        Ok(code) => (
            StatusCode::OK,
            Json(json!({
                "status": "started",
                "meeting_code": code.as_str(),
            })),
        ),
        Err(rejection @ StartRejection::InvalidCode(_)) => (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "status": "rejected",
                "reason": rejection.to_string(),
            })),
        ),
        Err(rejection @ StartRejection::AlreadyRunning) => (
            StatusCode::CONFLICT,
            Json(json!({
                "status": "rejected",
                "reason": rejection.to_string(),
            })),
        ),
    }
}

async fn stop_session(State(state): State<SessionApiState>) -> (StatusCode, Json<Value>) {
    info!("Stop command received via API");

    match state.controller.stop().await {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "stopping" }))),
        Err(rejection @ StopRejection::NotRunning) => (
            StatusCode::CONFLICT,
            Json(json!({
                "status": "rejected",
                "reason": rejection.to_string(),
            })),
        ),
    }
}

async fn session_status(State(state): State<SessionApiState>) -> Json<Value> {
    let status = state.controller.status().await;

    let last_report = status.last_report.as_ref().map(|report| {
        json!({
            "code": report.code.as_str(),
            "reason": report.reason.as_str(),
            "stop_trigger": report.stop_trigger.map(|t| t.as_str()),
            "artifact_path": report
                .artifact_path
                .as_ref()
                .map(|p| p.to_string_lossy().to_string()),
            "artifact_bytes": report.artifact_bytes,
            "drive_file_id": report.drive_file_id,
            "upload_error": report.upload_error,
            "error": report.error,
            "duration_seconds": report.duration_seconds,
        })
    });

    Json(json!({
        "recording": status.phase == SessionPhase::Recording,
        "phase": status.phase.as_str(),
        "meeting_code": status.code.as_ref().map(|c| c.as_str().to_string()),
        "duration_seconds": status.duration_seconds(),
        "output_path": status
            .output_path
            .as_ref()
            .map(|p| p.to_string_lossy().to_string()),
        "reason": status.reason.map(|r| r.as_str()),
        "last_error": status.last_error,
        "last_report": last_report,
    }))
}
