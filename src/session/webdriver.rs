//! Minimal W3C WebDriver wire client.
//!
//! Speaks just enough of the protocol for the Meet join flow: session
//! create/delete, navigation, element lookup by XPath, clicks, keystrokes,
//! attribute reads, and synchronous script execution. Also manages the
//! chromedriver subprocess the client talks to.

use super::SessionError;
use serde_json::{json, Value};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";
const STARTUP_TIMEOUT: Duration = Duration::from_secs(10);
const STARTUP_POLL: Duration = Duration::from_millis(200);

/// A chromedriver child bound to a free local port. Killed on drop as a
/// backstop; `shutdown` is the explicit path.
pub struct DriverProcess {
    child: Child,
    base_url: String,
}

impl DriverProcess {
    /// Spawn chromedriver and wait until its status endpoint answers ready.
    pub async fn launch(binary: &str, http: &reqwest::Client) -> Result<Self, SessionError> {
        let port = free_local_port()?;
        let child = Command::new(binary)
            .arg(format!("--port={port}"))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SessionError::Launch(format!("{binary}: {e}")))?;

        let base_url = format!("http://127.0.0.1:{port}");
        let mut process = Self { child, base_url };

        let deadline = tokio::time::Instant::now() + STARTUP_TIMEOUT;
        loop {
            if let Ok(response) = http
                .get(format!("{}/status", process.base_url))
                .send()
                .await
            {
                if response.status().is_success() {
                    debug!("chromedriver ready on {}", process.base_url);
                    return Ok(process);
                }
            }
            if tokio::time::Instant::now() >= deadline {
                process.shutdown().await;
                return Err(SessionError::Launch(
                    "chromedriver did not become ready".to_string(),
                ));
            }
            tokio::time::sleep(STARTUP_POLL).await;
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn shutdown(&mut self) {
        if let Err(e) = self.child.start_kill() {
            debug!("chromedriver already gone: {e}");
        }
        let _ = self.child.wait().await;
    }
}

fn free_local_port() -> Result<u16, SessionError> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")
        .map_err(|e| SessionError::Launch(format!("no free local port: {e}")))?;
    let port = listener
        .local_addr()
        .map_err(|e| SessionError::Launch(e.to_string()))?
        .port();
    Ok(port)
}

/// Opaque element reference returned by element lookups.
#[derive(Debug, Clone)]
pub struct ElementRef(String);

pub struct WebDriverClient {
    http: reqwest::Client,
    base_url: String,
    session_id: String,
}

impl WebDriverClient {
    /// Create a browser session with the given W3C capabilities.
    pub async fn new_session(
        http: reqwest::Client,
        base_url: &str,
        capabilities: Value,
    ) -> Result<Self, SessionError> {
        let body = json!({ "capabilities": { "alwaysMatch": capabilities } });
        let value = post_command(&http, &format!("{base_url}/session"), &body).await?;
        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| SessionError::Protocol("missing sessionId".to_string()))?
            .to_string();

        Ok(Self {
            http,
            base_url: base_url.to_string(),
            session_id,
        })
    }

    pub async fn goto(&self, url: &str) -> Result<(), SessionError> {
        self.post("url", &json!({ "url": url })).await.map(|_| ())
    }

    /// All elements matching an XPath. An empty vec is not an error.
    pub async fn find_by_xpath(&self, xpath: &str) -> Result<Vec<ElementRef>, SessionError> {
        let value = self
            .post("elements", &json!({ "using": "xpath", "value": xpath }))
            .await?;
        let refs = value
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.get(ELEMENT_KEY))
                    .filter_map(Value::as_str)
                    .map(|id| ElementRef(id.to_string()))
                    .collect()
            })
            .unwrap_or_default();
        Ok(refs)
    }

    pub async fn clear(&self, element: &ElementRef) -> Result<(), SessionError> {
        self.post(&format!("element/{}/clear", element.0), &json!({}))
            .await
            .map(|_| ())
    }

    pub async fn send_keys(&self, element: &ElementRef, text: &str) -> Result<(), SessionError> {
        self.post(&format!("element/{}/value", element.0), &json!({ "text": text }))
            .await
            .map(|_| ())
    }

    pub async fn attribute(
        &self,
        element: &ElementRef,
        name: &str,
    ) -> Result<Option<String>, SessionError> {
        let url = format!(
            "{}/session/{}/element/{}/attribute/{name}",
            self.base_url, self.session_id, element.0
        );
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))?;
        let value = unwrap_value(response).await?;
        Ok(value.as_str().map(str::to_string))
    }

    /// Click through script execution. Meet buttons are frequently covered
    /// by transient layers that reject native clicks; a script click is what
    /// works reliably against them.
    pub async fn script_click(&self, element: &ElementRef) -> Result<(), SessionError> {
        self.execute(
            "arguments[0].click();",
            vec![json!({ ELEMENT_KEY: element.0 })],
        )
        .await
        .map(|_| ())
    }

    pub async fn execute(&self, script: &str, args: Vec<Value>) -> Result<Value, SessionError> {
        self.post("execute/sync", &json!({ "script": script, "args": args }))
            .await
    }

    pub async fn delete_session(&self) -> Result<(), SessionError> {
        let url = format!("{}/session/{}", self.base_url, self.session_id);
        let response = self
            .http
            .delete(&url)
            .send()
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            warn!("session delete returned {}", response.status());
        }
        Ok(())
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value, SessionError> {
        let url = format!("{}/session/{}/{path}", self.base_url, self.session_id);
        post_command(&self.http, &url, body).await
    }
}

async fn post_command(
    http: &reqwest::Client,
    url: &str,
    body: &Value,
) -> Result<Value, SessionError> {
    let response = http
        .post(url)
        .json(body)
        .send()
        .await
        .map_err(|e| SessionError::Transport(e.to_string()))?;
    unwrap_value(response).await
}

/// Every WebDriver response wraps its payload in `{"value": ...}`; error
/// responses put `{"error", "message"}` inside that same envelope.
async fn unwrap_value(response: reqwest::Response) -> Result<Value, SessionError> {
    let status = response.status();
    let body: Value = response
        .json()
        .await
        .map_err(|e| SessionError::Transport(e.to_string()))?;
    let value = body.get("value").cloned().unwrap_or(Value::Null);

    if !status.is_success() {
        let kind = value
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default();
        return Err(SessionError::Protocol(format!("{kind}: {message}")));
    }
    Ok(value)
}
