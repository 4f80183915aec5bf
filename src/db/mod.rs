//! Session history persistence.
//!
//! Raw SQL with rusqlite, no ORM. One row per terminated run; the
//! controller writes through `SqliteReportSink`, the API and CLI read.

use crate::controller::{ReportSink, SessionReport};
use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use tracing::warn;

pub fn init_db() -> Result<Connection> {
    let db_path = crate::global::db_file()?;

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }

    let conn = Connection::open(&db_path).context("Failed to open database connection")?;

    migrate(&conn)?;

    Ok(conn)
}

pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS sessions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            code TEXT NOT NULL,
            outcome TEXT NOT NULL,
            stop_trigger TEXT,
            artifact_path TEXT,
            artifact_bytes INTEGER,
            drive_file_id TEXT,
            upload_error TEXT,
            error TEXT,
            duration_seconds INTEGER NOT NULL DEFAULT 0,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )
    .context("Failed to create sessions table")?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sessions_created_at ON sessions(created_at DESC)",
        [],
    )
    .context("Failed to create index on created_at")?;

    Ok(())
}

/// A terminated session run, as stored.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub id: i64,
    pub code: String,
    pub outcome: String,
    pub stop_trigger: Option<String>,
    pub artifact_path: Option<String>,
    pub artifact_bytes: Option<i64>,
    pub drive_file_id: Option<String>,
    pub upload_error: Option<String>,
    pub error: Option<String>,
    pub duration_seconds: i64,
    pub created_at: String,
}

pub struct SessionRepository;

impl SessionRepository {
    pub fn insert(conn: &Connection, report: &SessionReport) -> Result<i64> {
        conn.execute(
            "INSERT INTO sessions (code, outcome, stop_trigger, artifact_path, artifact_bytes, \
             drive_file_id, upload_error, error, duration_seconds) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                report.code.as_str(),
                report.reason.as_str(),
                report.stop_trigger.map(|t| t.as_str()),
                report
                    .artifact_path
                    .as_ref()
                    .map(|p| p.to_string_lossy().into_owned()),
                report.artifact_bytes.map(|b| b as i64),
                report.drive_file_id.as_deref(),
                report.upload_error.as_deref(),
                report.error.as_deref(),
                report.duration_seconds as i64,
            ],
        )
        .context("Failed to insert session record")?;

        Ok(conn.last_insert_rowid())
    }

    pub fn list(conn: &Connection, limit: usize) -> Result<Vec<SessionRecord>> {
        let mut stmt = conn
            .prepare(
                "SELECT id, code, outcome, stop_trigger, artifact_path, artifact_bytes, \
                 drive_file_id, upload_error, error, duration_seconds, created_at \
                 FROM sessions ORDER BY created_at DESC, id DESC LIMIT ?1",
            )
            .context("Failed to prepare session list query")?;

        let rows = stmt
            .query_map(params![limit as i64], Self::map_row)
            .context("Failed to query sessions")?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    pub fn get(conn: &Connection, id: i64) -> Result<Option<SessionRecord>> {
        let mut stmt = conn
            .prepare(
                "SELECT id, code, outcome, stop_trigger, artifact_path, artifact_bytes, \
                 drive_file_id, upload_error, error, duration_seconds, created_at \
                 FROM sessions WHERE id = ?1",
            )
            .context("Failed to prepare session query")?;

        let mut rows = stmt
            .query_map(params![id], Self::map_row)
            .context("Failed to query session")?;

        match rows.next() {
            Some(Ok(record)) => Ok(Some(record)),
            Some(Err(e)) => Err(e.into()),
            None => Ok(None),
        }
    }

    fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionRecord> {
        Ok(SessionRecord {
            id: row.get(0)?,
            code: row.get(1)?,
            outcome: row.get(2)?,
            stop_trigger: row.get(3)?,
            artifact_path: row.get(4)?,
            artifact_bytes: row.get(5)?,
            drive_file_id: row.get(6)?,
            upload_error: row.get(7)?,
            error: row.get(8)?,
            duration_seconds: row.get(9)?,
            created_at: row.get(10)?,
        })
    }
}

/// Persists terminal reports to the history table. A storage failure is
/// logged; it never disturbs the controller's terminal state.
pub struct SqliteReportSink;

impl ReportSink for SqliteReportSink {
    fn record(&self, report: &SessionReport) {
        match init_db() {
            Ok(conn) => {
                if let Err(e) = SessionRepository::insert(&conn, report) {
                    warn!("Failed to record session history: {e}");
                }
            }
            Err(e) => warn!("Failed to open history database: {e}"),
        }
    }
}
