//! Unit status lifecycle and the remote numeric code table.
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Lifecycle states a unit of work goes through, as known by the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Queued,
    Processing,
    Success,
    Failure,
    Error,
    Cancelling,
    TimingOut,
}

impl StatusCode {
    pub const ALL: [StatusCode; 7] = [
        StatusCode::Queued,
        StatusCode::Processing,
        StatusCode::Success,
        StatusCode::Failure,
        StatusCode::Error,
        StatusCode::Cancelling,
        StatusCode::TimingOut,
    ];

    /// Name used by the remote service for this status.
    pub fn name(&self) -> &'static str {
        match self {
            StatusCode::Queued => "queued",
            StatusCode::Processing => "processing",
            StatusCode::Success => "success",
            StatusCode::Failure => "failure",
            StatusCode::Error => "error",
            StatusCode::Cancelling => "cancelling",
            StatusCode::TimingOut => "timingOut",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.name() == name)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A terminating value written by the external controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminatingSignal {
    Cancelled,
    TimedOut,
}

impl TerminatingSignal {
    /// Every token that is recognised as a terminating signal.
    pub const TOKENS: [&'static str; 4] = ["cancelled", "cancelling", "timeout", "timingOut"];

    pub fn from_token(token: &str) -> Option<Self> {
        match token.trim() {
            "cancelled" | "cancelling" => Some(TerminatingSignal::Cancelled),
            "timeout" | "timingOut" => Some(TerminatingSignal::TimedOut),
            _ => None,
        }
    }

    /// Status owned by the controller once this signal has been observed.
    pub fn status_code(&self) -> StatusCode {
        match self {
            TerminatingSignal::Cancelled => StatusCode::Cancelling,
            TerminatingSignal::TimedOut => StatusCode::TimingOut,
        }
    }
}

/// One entry of the remote system code list.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SystemCode {
    pub name: String,
    pub code: i64,
}

#[derive(Error, Debug, PartialEq)]
pub enum StatusCodeError {
    #[error("remote system codes do not define `{0}`")]
    MissingName(&'static str),
}

/// Bidirectional table between [StatusCode] and the numeric codes of the remote service.
#[derive(Debug, Clone, PartialEq)]
pub struct SystemCodes {
    by_status: HashMap<StatusCode, i64>,
    by_code: HashMap<i64, StatusCode>,
}

impl SystemCodes {
    /// Builds the table, failing if any status known to the agent is absent from the remote list.
    pub fn try_from_remote(codes: Vec<SystemCode>) -> Result<Self, StatusCodeError> {
        let remote: HashMap<String, i64> = codes.into_iter().map(|c| (c.name, c.code)).collect();

        let mut by_status = HashMap::new();
        let mut by_code = HashMap::new();
        for status in StatusCode::ALL {
            let code = *remote
                .get(status.name())
                .ok_or(StatusCodeError::MissingName(status.name()))?;
            by_status.insert(status, code);
            by_code.insert(code, status);
        }

        Ok(Self { by_status, by_code })
    }

    pub fn code(&self, status: StatusCode) -> i64 {
        // try_from_remote guarantees every status is present
        self.by_status.get(&status).copied().unwrap_or_default()
    }

    pub fn status(&self, code: i64) -> Option<StatusCode> {
        self.by_code.get(&code).copied()
    }
}
