//! Session history endpoints.
//!
//! - `GET /sessions` - recent terminated runs
//! - `GET /sessions/:id` - one run

use crate::api::error::{ApiError, ApiResult};
use crate::db::{self, SessionRepository};
use axum::{
    extract::{Path, Query},
    response::Json,
    routing::get,
    Router,
};
use serde_json::{json, Value};
use std::collections::HashMap;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_sessions))
        .route("/:id", get(get_session))
}

async fn list_sessions(Query(params): Query<HashMap<String, String>>) -> ApiResult<Json<Value>> {
    let limit: usize = params
        .get("limit")
        .and_then(|v| v.parse().ok())
        .unwrap_or(20);

    let records = tokio::task::spawn_blocking(move || {
        let conn = db::init_db()?;
        SessionRepository::list(&conn, limit)
    })
    .await
    .map_err(|e| ApiError::internal(e.to_string()))??;

    let entries: Vec<Value> = records.iter().map(record_json).collect();
    Ok(Json(json!({ "sessions": entries })))
}

async fn get_session(Path(id): Path<i64>) -> ApiResult<Json<Value>> {
    let record = tokio::task::spawn_blocking(move || {
        let conn = db::init_db()?;
        SessionRepository::get(&conn, id)
    })
    .await
    .map_err(|e| ApiError::internal(e.to_string()))??;

    match record {
        Some(record) => Ok(Json(record_json(&record))),
        None => Err(ApiError::not_found(format!("no session with id {id}"))),
    }
}

fn record_json(record: &db::SessionRecord) -> Value {
    json!({
        "id": record.id,
        "code": record.code,
        "outcome": record.outcome,
        "stop_trigger": record.stop_trigger,
        "artifact_path": record.artifact_path,
        "artifact_bytes": record.artifact_bytes,
        "drive_file_id": record.drive_file_id,
        "upload_error": record.upload_error,
        "error": record.error,
        "duration_seconds": record.duration_seconds,
        "created_at": record.created_at,
    })
}
