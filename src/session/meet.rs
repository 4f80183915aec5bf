//! Google Meet guest session driven over WebDriver.

use super::webdriver::{DriverProcess, ElementRef, WebDriverClient};
use super::{JoinError, MeetingCode, MeetingSession, ProbeOutcome, SessionError, SessionOpener};
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

const POLL_INTERVAL: Duration = Duration::from_secs(1);
const INTERSTITIAL_WAIT: Duration = Duration::from_secs(5);

mod xpath {
    pub const NAME_INPUT: &str = "//input[@placeholder='Your name']";
    pub const JOIN_CONTROL: &str =
        "//*[contains(text(),'Join now')] | //*[contains(text(),'Ask to join')]";
    pub const IN_CALL: &str =
        "//*[contains(text(),'Leave call') or contains(@aria-label,'Leave call')]";
    pub const MEETING_ENDED: &str = "//*[contains(text(),'Meeting ended')]";
    pub const CONTINUE_WITHOUT_DEVICES: &str =
        "//span[contains(text(),'Continue without microphone and camera')]";
    pub const GOT_IT: &str = "//button[contains(translate(text(),'GOTIT','gotit'),'got it')]";
}

/// Opens Meet sessions: launches chromedriver, creates a browser with
/// media capture denied, and navigates to the meeting.
pub struct MeetSessionOpener {
    http: reqwest::Client,
    chromedriver: String,
    display_name: String,
    admission_timeout: Duration,
}

impl MeetSessionOpener {
    pub fn new(
        chromedriver: Option<String>,
        display_name: String,
        admission_timeout: Duration,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            chromedriver: chromedriver.unwrap_or_else(|| "chromedriver".to_string()),
            display_name,
            admission_timeout,
        }
    }

    /// Chrome capabilities: deny mic/camera outright so the guest can never
    /// transmit, and drop the automation banner switches.
    fn capabilities() -> serde_json::Value {
        json!({
            "browserName": "chrome",
            "goog:chromeOptions": {
                "args": [
                    "--no-sandbox",
                    "--disable-dev-shm-usage",
                    "--disable-blink-features=AutomationControlled",
                    "--start-maximized",
                    "--disable-notifications",
                ],
                "excludeSwitches": ["enable-automation"],
                "prefs": {
                    "profile.default_content_setting_values.media_stream_mic": 2,
                    "profile.default_content_setting_values.media_stream_camera": 2,
                },
            },
        })
    }
}

#[async_trait]
impl SessionOpener for MeetSessionOpener {
    async fn open(&self, code: &MeetingCode) -> Result<Box<dyn MeetingSession>, JoinError> {
        let mut driver = DriverProcess::launch(&self.chromedriver, &self.http).await?;

        let client = match WebDriverClient::new_session(
            self.http.clone(),
            driver.base_url(),
            Self::capabilities(),
        )
        .await
        {
            Ok(client) => client,
            Err(e) => {
                driver.shutdown().await;
                return Err(e.into());
            }
        };

        Ok(Box::new(MeetSession {
            client,
            driver,
            url: code.meeting_url(),
            display_name: self.display_name.clone(),
            admission_timeout: self.admission_timeout,
            closed: false,
        }))
    }
}

pub struct MeetSession {
    client: WebDriverClient,
    driver: DriverProcess,
    url: String,
    display_name: String,
    admission_timeout: Duration,
    closed: bool,
}

impl MeetSession {
    /// Poll for an XPath until it matches or the deadline passes.
    async fn wait_for(
        &self,
        xpath: &str,
        timeout: Duration,
    ) -> Result<Option<ElementRef>, SessionError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let mut found = self.client.find_by_xpath(xpath).await?;
            if let Some(element) = found.drain(..).next() {
                return Ok(Some(element));
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    /// Click an interstitial button if it shows up within a short wait.
    async fn dismiss_if_present(&self, xpath: &str, label: &str) {
        match self.wait_for(xpath, INTERSTITIAL_WAIT).await {
            Ok(Some(element)) => {
                if let Err(e) = self.client.script_click(&element).await {
                    debug!("could not click '{label}': {e}");
                } else {
                    info!("Dismissed '{label}' interstitial");
                }
            }
            Ok(None) => debug!("no '{label}' interstitial"),
            Err(e) => debug!("lookup for '{label}' failed: {e}"),
        }
    }

    /// Toggle off a preview-page device button when it is still on. The
    /// aria-label flips between "Turn off X" and "Turn on X".
    async fn mute_device(&self, device: &str) {
        let xpath = format!("//div[contains(@aria-label,'{device}')]");
        let elements = match self.client.find_by_xpath(&xpath).await {
            Ok(elements) => elements,
            Err(e) => {
                debug!("{device} toggle lookup failed: {e}");
                return;
            }
        };
        for element in &elements {
            match self.client.attribute(element, "aria-label").await {
                Ok(Some(label)) if label.contains("Turn off") => {
                    if let Err(e) = self.client.script_click(element).await {
                        warn!("failed to turn off {device}: {e}");
                    } else {
                        info!("{device} turned off on preview page");
                    }
                    return;
                }
                Ok(_) => {}
                Err(e) => debug!("{device} attribute read failed: {e}"),
            }
        }
        debug!("no {device} toggle found or already off");
    }
}

#[async_trait]
impl MeetingSession for MeetSession {
    async fn join(&mut self) -> Result<(), JoinError> {
        info!("Navigating to {}", self.url);
        self.client.goto(&self.url).await?;

        let name_input = self
            .wait_for(xpath::NAME_INPUT, self.admission_timeout)
            .await?
            .ok_or(JoinError::NoGuestEntry)?;
        self.client.clear(&name_input).await?;
        self.client.send_keys(&name_input, &self.display_name).await?;
        info!("Entered display name {:?}", self.display_name);

        self.mute_device("camera").await;
        self.mute_device("microphone").await;

        self.dismiss_if_present(
            xpath::CONTINUE_WITHOUT_DEVICES,
            "Continue without microphone and camera",
        )
        .await;
        self.dismiss_if_present(xpath::GOT_IT, "Got it").await;

        let join_control = self
            .wait_for(xpath::JOIN_CONTROL, self.admission_timeout)
            .await?
            .ok_or(JoinError::AdmissionTimeout)?;
        self.client.script_click(&join_control).await?;
        info!("Clicked join control, waiting for admission");

        // Covers both immediate entry and the moderated "Ask to join" wait.
        match self.wait_for(xpath::IN_CALL, self.admission_timeout).await? {
            Some(_) => {
                info!("Joined meeting");
                Ok(())
            }
            None => Err(JoinError::AdmissionTimeout),
        }
    }

    async fn dismiss_obstruction(&mut self) {
        // The known obstructions are the device/consent interstitials; hit
        // both, then Escape whatever else might hold focus.
        self.dismiss_if_present(
            xpath::CONTINUE_WITHOUT_DEVICES,
            "Continue without microphone and camera",
        )
        .await;
        self.dismiss_if_present(xpath::GOT_IT, "Got it").await;
        if let Err(e) = self
            .client
            .execute(
                "document.activeElement && document.activeElement.blur();",
                vec![],
            )
            .await
        {
            debug!("obstruction blur failed: {e}");
        }
    }

    async fn probe(&mut self) -> ProbeOutcome {
        match self.client.find_by_xpath(xpath::IN_CALL).await {
            Ok(elements) if !elements.is_empty() => ProbeOutcome::Active,
            Ok(_) => match self.client.find_by_xpath(xpath::MEETING_ENDED).await {
                Ok(ended) if !ended.is_empty() => {
                    info!("Meeting ended message found");
                    ProbeOutcome::Ended
                }
                // Neither signal: status unclear, treat as live.
                Ok(_) => ProbeOutcome::Active,
                Err(e) => {
                    warn!("liveness probe failed: {e}");
                    ProbeOutcome::Ambiguous
                }
            },
            Err(e) => {
                warn!("liveness probe failed: {e}");
                ProbeOutcome::Ambiguous
            }
        }
    }

    async fn leave(&mut self) -> Result<(), SessionError> {
        let elements = self.client.find_by_xpath(xpath::IN_CALL).await?;
        match elements.first() {
            Some(element) => {
                self.client.script_click(element).await?;
                info!("Left the meeting");
                Ok(())
            }
            None => {
                debug!("no leave control present, nothing to leave");
                Ok(())
            }
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.client.delete_session().await {
            warn!("failed to delete browser session: {e}");
        }
        self.driver.shutdown().await;
        info!("Browser session closed");
    }
}
