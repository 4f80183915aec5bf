//! Remote meeting session abstraction.
//!
//! The lifecycle controller only sees the `MeetingSession` trait; the
//! concrete implementation drives Google Meet over the WebDriver wire
//! protocol against a chromedriver subprocess.

pub mod code;
pub mod meet;
pub mod webdriver;

pub use code::{CodeError, MeetingCode};
pub use meet::{MeetSession, MeetSessionOpener};

use async_trait::async_trait;
use thiserror::Error;

/// One liveness check of the remote meeting.
///
/// `Ambiguous` means the check itself failed (browser gone, transport
/// error); the controller debounces it rather than stopping on one miss.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Active,
    Ended,
    Ambiguous,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("webdriver request failed: {0}")]
    Transport(String),
    #[error("webdriver error: {0}")]
    Protocol(String),
    #[error("failed to launch chromedriver: {0}")]
    Launch(String),
}

#[derive(Debug, Error)]
pub enum JoinError {
    #[error("timed out waiting for meeting admission")]
    AdmissionTimeout,
    #[error("join page did not offer a guest entry form")]
    NoGuestEntry,
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// A live handle on one remote meeting. Owned by the controller worker for
/// the duration of a run and closed exactly once on every exit path.
#[async_trait]
pub trait MeetingSession: Send {
    /// Drive the guest join flow through to a confirmed in-call state.
    async fn join(&mut self) -> Result<(), JoinError>;

    /// Best-effort clearing of whatever is blocking the join controls,
    /// called between attempts.
    async fn dismiss_obstruction(&mut self);

    /// Check whether the meeting is still live.
    async fn probe(&mut self) -> ProbeOutcome;

    /// Leave the meeting politely. Failure is not fatal; `close` still runs.
    async fn leave(&mut self) -> Result<(), SessionError>;

    /// Tear down the browser session and its driver process. Idempotent.
    async fn close(&mut self);
}

/// Creates a fresh `MeetingSession` for one run. A failed open must not
/// leak a browser: implementations clean up internally before returning.
#[async_trait]
pub trait SessionOpener: Send + Sync {
    async fn open(&self, code: &MeetingCode) -> Result<Box<dyn MeetingSession>, JoinError>;
}
