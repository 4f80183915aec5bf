//! Google Drive upload client.
//!
//! Uses the resumable upload protocol so multi-hour recordings stream from
//! disk instead of being buffered in memory: one metadata request yields an
//! upload URL, one PUT streams the file.

use super::auth::{self, StoredToken};
use super::{ArtifactStore, AuthError, UploadError};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tokio_util::io::ReaderStream;
use tracing::info;

const UPLOAD_URL: &str = "https://www.googleapis.com/upload/drive/v3/files";
const ARTIFACT_MIME: &str = "video/mp4";

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteFile {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

pub struct DriveStore {
    http: reqwest::Client,
    token_path: PathBuf,
}

impl DriveStore {
    pub fn new(token_path: PathBuf) -> Self {
        Self {
            http: reqwest::Client::new(),
            token_path,
        }
    }

    /// Load the persisted credential, refreshing and rewriting it when
    /// expired. Interactive auth never happens here; a missing credential
    /// is an error pointing at `meetrec auth`.
    async fn ensure_token(&self) -> Result<StoredToken, AuthError> {
        let token = auth::load_token(&self.token_path)?;
        if !token.is_expired() {
            return Ok(token);
        }

        let refreshed = auth::refresh(&self.http, &token).await?;
        auth::save_token(&self.token_path, &refreshed)?;
        Ok(refreshed)
    }

    async fn begin_resumable(
        &self,
        token: &StoredToken,
        metadata: &Value,
    ) -> Result<String, UploadError> {
        let response = self
            .http
            .post(format!("{UPLOAD_URL}?uploadType=resumable&fields=id,name"))
            .bearer_auth(&token.access_token)
            .header("X-Upload-Content-Type", ARTIFACT_MIME)
            .json(metadata)
            .send()
            .await
            .map_err(|e| UploadError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(UploadError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                UploadError::Request("resumable session carried no upload URL".to_string())
            })
    }
}

pub(crate) fn upload_metadata(path: &Path, folder_id: Option<&str>) -> Value {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "recording.mp4".to_string());

    let mut metadata = json!({ "name": name });
    if let Some(folder) = folder_id.filter(|f| !f.is_empty()) {
        metadata["parents"] = json!([folder]);
    }
    metadata
}

#[async_trait]
impl ArtifactStore for DriveStore {
    async fn upload(
        &self,
        path: &Path,
        folder_id: Option<&str>,
    ) -> Result<RemoteFile, UploadError> {
        let token = self.ensure_token().await?;
        let metadata = upload_metadata(path, folder_id);
        let size = tokio::fs::metadata(path).await?.len();

        info!("Uploading {:?} ({} bytes) to Drive", path, size);
        let upload_url = self.begin_resumable(&token, &metadata).await?;

        let file = tokio::fs::File::open(path).await?;
        let response = self
            .http
            .put(&upload_url)
            .header(reqwest::header::CONTENT_TYPE, ARTIFACT_MIME)
            .header(reqwest::header::CONTENT_LENGTH, size)
            .body(reqwest::Body::wrap_stream(ReaderStream::new(file)))
            .send()
            .await
            .map_err(|e| UploadError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(UploadError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let remote: RemoteFile = response
            .json()
            .await
            .map_err(|e| UploadError::Request(e.to_string()))?;
        info!("Uploaded to Drive with ID {}", remote.id);
        Ok(remote)
    }
}
