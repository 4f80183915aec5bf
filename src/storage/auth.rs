//! OAuth credential handling for Drive.
//!
//! The persisted `token.json` follows the field names Google's client
//! libraries write, so an existing credential can be dropped in as-is.
//! Interactive authorization runs the installed-app loopback flow: a
//! one-shot local listener receives the redirect, the code is exchanged,
//! and the token is persisted for reuse.

use super::AuthError;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::info;

pub const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive.file";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Refresh this long before nominal expiry.
const EXPIRY_SLACK_SECONDS: i64 = 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredToken {
    #[serde(rename = "token")]
    pub access_token: String,
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    pub expiry: Option<DateTime<Utc>>,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl StoredToken {
    pub fn is_expired(&self) -> bool {
        match self.expiry {
            Some(expiry) => Utc::now() + ChronoDuration::seconds(EXPIRY_SLACK_SECONDS) >= expiry,
            // No recorded expiry: assume stale and let a refresh sort it out.
            None => self.refresh_token.is_some(),
        }
    }
}

pub fn load_token(path: &Path) -> Result<StoredToken, AuthError> {
    if !path.exists() {
        return Err(AuthError::MissingToken);
    }
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(|e| AuthError::InvalidToken(e.to_string()))
}

pub fn save_token(path: &Path, token: &StoredToken) -> Result<(), AuthError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content =
        serde_json::to_string_pretty(token).map_err(|e| AuthError::InvalidToken(e.to_string()))?;
    std::fs::write(path, content)?;
    info!("Credential saved to {:?}", path);
    Ok(())
}

/// OAuth client registration in Google's installed-app `credentials.json`
/// format.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecret {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_auth_uri() -> String {
    "https://accounts.google.com/o/oauth2/auth".to_string()
}

impl ClientSecret {
    pub fn load(path: &Path) -> Result<Self, AuthError> {
        let content = std::fs::read_to_string(path)?;
        let value: Value = serde_json::from_str(&content)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        let installed = value
            .get("installed")
            .cloned()
            .unwrap_or(value);
        serde_json::from_value(installed).map_err(|e| AuthError::InvalidToken(e.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Exchange the refresh token for a fresh access token, keeping the rest of
/// the stored credential intact.
pub async fn refresh(
    http: &reqwest::Client,
    token: &StoredToken,
) -> Result<StoredToken, AuthError> {
    let refresh_token = token
        .refresh_token
        .as_deref()
        .ok_or_else(|| AuthError::RefreshFailed("no refresh token stored".to_string()))?;

    let response = http
        .post(&token.token_uri)
        .form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", &token.client_id),
            ("client_secret", &token.client_secret),
        ])
        .send()
        .await
        .map_err(|e| AuthError::RefreshFailed(e.to_string()))?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(AuthError::RefreshFailed(format!("{status}: {body}")));
    }

    let parsed: TokenResponse = response
        .json()
        .await
        .map_err(|e| AuthError::RefreshFailed(e.to_string()))?;

    info!("Access token refreshed");
    Ok(StoredToken {
        access_token: parsed.access_token,
        refresh_token: parsed
            .refresh_token
            .or_else(|| token.refresh_token.clone()),
        expiry: parsed
            .expires_in
            .map(|seconds| Utc::now() + ChronoDuration::seconds(seconds)),
        ..token.clone()
    })
}

/// Installed-app consent flow with a loopback redirect. Blocks until the
/// browser redirect arrives on the one-shot listener.
pub async fn interactive_flow(
    http: &reqwest::Client,
    secret: &ClientSecret,
) -> Result<StoredToken, AuthError> {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .map_err(|e| AuthError::Flow(format!("could not bind redirect listener: {e}")))?;
    let port = listener
        .local_addr()
        .map_err(|e| AuthError::Flow(e.to_string()))?
        .port();
    let redirect_uri = format!("http://127.0.0.1:{port}");

    let consent_url = reqwest::Url::parse_with_params(
        &secret.auth_uri,
        [
            ("client_id", secret.client_id.as_str()),
            ("redirect_uri", redirect_uri.as_str()),
            ("response_type", "code"),
            ("scope", DRIVE_SCOPE),
            ("access_type", "offline"),
            ("prompt", "consent"),
        ],
    )
    .map_err(|e| AuthError::Flow(e.to_string()))?;

    println!("Open this URL in a browser to authorize Drive access:\n\n{consent_url}\n");
    info!("Waiting for OAuth redirect on {redirect_uri}");

    let code = wait_for_redirect_code(&listener).await?;

    let response = http
        .post(&secret.token_uri)
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("client_id", secret.client_id.as_str()),
            ("client_secret", secret.client_secret.as_str()),
            ("redirect_uri", redirect_uri.as_str()),
        ])
        .send()
        .await
        .map_err(|e| AuthError::Flow(e.to_string()))?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(AuthError::Flow(format!("code exchange failed: {status}: {body}")));
    }

    let parsed: TokenResponse = response
        .json()
        .await
        .map_err(|e| AuthError::Flow(e.to_string()))?;

    Ok(StoredToken {
        access_token: parsed.access_token,
        refresh_token: parsed.refresh_token,
        token_uri: secret.token_uri.clone(),
        client_id: secret.client_id.clone(),
        client_secret: secret.client_secret.clone(),
        scopes: vec![DRIVE_SCOPE.to_string()],
        expiry: parsed
            .expires_in
            .map(|seconds| Utc::now() + ChronoDuration::seconds(seconds)),
    })
}

/// Accept one connection, pull `code` out of the request line, and answer
/// with a small confirmation page.
async fn wait_for_redirect_code(listener: &TcpListener) -> Result<String, AuthError> {
    let (mut stream, _) = listener
        .accept()
        .await
        .map_err(|e| AuthError::Flow(e.to_string()))?;

    let mut buffer = vec![0u8; 4096];
    let read = stream
        .read(&mut buffer)
        .await
        .map_err(|e| AuthError::Flow(e.to_string()))?;
    let request = String::from_utf8_lossy(&buffer[..read]);

    let code = extract_query_param(&request, "code")
        .ok_or_else(|| AuthError::Flow("redirect carried no authorization code".to_string()))?;

    let body = "Authorization complete. You can close this tab.";
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    );
    let _ = stream.write_all(response.as_bytes()).await;

    Ok(code)
}

fn extract_query_param(request: &str, name: &str) -> Option<String> {
    let request_line = request.lines().next()?;
    let path = request_line.split_whitespace().nth(1)?;
    let query = path.split_once('?')?.1;
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| percent_decode(value))
}

/// Just enough decoding for an OAuth redirect query value.
fn percent_decode(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
                match hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    Some(byte) => {
                        out.push(byte);
                        i += 3;
                    }
                    None => {
                        out.push(bytes[i]);
                        i += 1;
                    }
                }
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            byte => {
                out.push(byte);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_token(expiry: Option<DateTime<Utc>>) -> StoredToken {
        StoredToken {
            access_token: "ya29.sample".to_string(),
            refresh_token: Some("1//refresh".to_string()),
            token_uri: DEFAULT_TOKEN_URI.to_string(),
            client_id: "client-id".to_string(),
            client_secret: "client-secret".to_string(),
            scopes: vec![DRIVE_SCOPE.to_string()],
            expiry,
        }
    }

    #[test]
    fn test_expiry_detection() {
        let fresh = sample_token(Some(Utc::now() + ChronoDuration::hours(1)));
        assert!(!fresh.is_expired());

        let stale = sample_token(Some(Utc::now() - ChronoDuration::minutes(5)));
        assert!(stale.is_expired());

        // Inside the slack window counts as expired.
        let expiring = sample_token(Some(Utc::now() + ChronoDuration::seconds(10)));
        assert!(expiring.is_expired());
    }

    #[test]
    fn test_token_roundtrip_uses_google_field_names() {
        let token = sample_token(Some(Utc::now() + ChronoDuration::hours(1)));
        let json = serde_json::to_string(&token).unwrap();
        assert!(json.contains("\"token\""));
        assert!(!json.contains("\"access_token\""));

        let parsed: StoredToken = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.access_token, token.access_token);
        assert_eq!(parsed.refresh_token, token.refresh_token);
    }

    #[test]
    fn test_load_token_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_token(&dir.path().join("token.json")).unwrap_err();
        assert!(matches!(err, AuthError::MissingToken));
    }

    #[test]
    fn test_save_and_load_token() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("token.json");
        let token = sample_token(None);

        save_token(&path, &token).unwrap();
        let loaded = load_token(&path).unwrap();
        assert_eq!(loaded.client_id, "client-id");
    }

    #[test]
    fn test_client_secret_installed_wrapper() {
        let json = r#"{
            "installed": {
                "client_id": "abc.apps.googleusercontent.com",
                "client_secret": "shhh",
                "auth_uri": "https://accounts.google.com/o/oauth2/auth",
                "token_uri": "https://oauth2.googleapis.com/token"
            }
        }"#;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        std::fs::write(&path, json).unwrap();

        let secret = ClientSecret::load(&path).unwrap();
        assert_eq!(secret.client_id, "abc.apps.googleusercontent.com");
        assert_eq!(secret.token_uri, "https://oauth2.googleapis.com/token");
    }

    #[test]
    fn test_extract_query_param() {
        let request = "GET /?state=xyz&code=4%2FabcDEF&scope=drive HTTP/1.1\r\nHost: x\r\n\r\n";
        assert_eq!(
            extract_query_param(request, "code").as_deref(),
            Some("4/abcDEF")
        );
        assert_eq!(extract_query_param(request, "missing"), None);
    }

    #[test]
    fn test_percent_decode() {
        assert_eq!(percent_decode("plain"), "plain");
        assert_eq!(percent_decode("a%2Fb%3Dc"), "a/b=c");
        assert_eq!(percent_decode("one+two"), "one two");
        assert_eq!(percent_decode("dangling%2"), "dangling%2");
    }
}
