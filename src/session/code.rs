//! Validated Google Meet meeting code.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use thiserror::Error;

static CODE_PATTERN: OnceLock<Regex> = OnceLock::new();

fn code_pattern() -> &'static Regex {
    CODE_PATTERN.get_or_init(|| {
        Regex::new(r"^[a-z]{3}-[a-z]{4}-[a-z]{3}$").expect("meeting code pattern is valid")
    })
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodeError {
    #[error("invalid meeting code {0:?}: expected xxx-xxxx-xxx (lowercase letters)")]
    InvalidFormat(String),
}

/// A meeting code in the `xxx-xxxx-xxx` form. Construction validates; the
/// inner string is immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub struct MeetingCode(String);

impl MeetingCode {
    pub fn parse(raw: &str) -> Result<Self, CodeError> {
        let trimmed = raw.trim();
        if code_pattern().is_match(trimmed) {
            Ok(Self(trimmed.to_string()))
        } else {
            Err(CodeError::InvalidFormat(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn meeting_url(&self) -> String {
        format!("https://meet.google.com/{}", self.0)
    }
}

impl fmt::Display for MeetingCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for MeetingCode {
    type Err = CodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for MeetingCode {
    type Error = CodeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}
