//! Artifact storage behind a trait.
//!
//! The concrete implementation uploads to Google Drive with a persisted
//! OAuth credential. Upload failure is surfaced to the caller but is never
//! fatal to the session lifecycle.

pub mod auth;
pub mod drive;

pub use drive::{DriveStore, RemoteFile};

use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no stored credential; run `meetrec auth` first")]
    MissingToken,
    #[error("stored credential is unreadable: {0}")]
    InvalidToken(String),
    #[error("token refresh failed: {0}")]
    RefreshFailed(String),
    #[error("authorization flow failed: {0}")]
    Flow(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("upload request failed: {0}")]
    Request(String),
    #[error("storage rejected upload (status {status}): {message}")]
    Rejected { status: u16, message: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Single-attempt upload of a local artifact, optionally filed under a
    /// folder. Returns the remote identifier.
    async fn upload(&self, path: &Path, folder_id: Option<&str>)
        -> Result<RemoteFile, UploadError>;
}
