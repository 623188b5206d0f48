use crate::status::StatusCode;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("could not read `{path}`: {err}")]
    Read { path: String, err: std::io::Error },
    #[error("invalid roster in `{path}`: {err}")]
    InvalidRoster {
        path: String,
        err: serde_json::Error,
    },
}

/// An externally writable value the agent polls to learn about terminating requests.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StatusSource: Send + Sync {
    /// Human readable identifier, used for logs and validation.
    fn id(&self) -> String;

    async fn read(&self) -> Result<String, SourceError>;
}

/// Plain-text file holding a single token such as `cancelled` or `timeout`.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl StatusSource for FileSource {
    fn id(&self) -> String {
        self.path.display().to_string()
    }

    async fn read(&self) -> Result<String, SourceError> {
        read_file(&self.path).await
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Roster {
    #[serde(default)]
    cancelling: Vec<Value>,
    #[serde(default)]
    timing_out: Vec<Value>,
}

/// Listed ids may be numbers or strings.
fn listed(ids: &[Value], step_id: &str) -> bool {
    ids.iter().any(|id| match id {
        Value::String(s) => s.trim() == step_id,
        Value::Number(n) => n.to_string() == step_id,
        _ => false,
    })
}

/// JSON roster shared by every step of a group, listing the steps the controller is terminating.
///
/// Reads as `cancelling`, `timingOut` or an empty value for the watched step.
#[derive(Debug, Clone)]
pub struct RosterSource {
    path: PathBuf,
    step_id: String,
}

impl RosterSource {
    pub fn new(path: impl Into<PathBuf>, step_id: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            step_id: step_id.into(),
        }
    }
}

#[async_trait]
impl StatusSource for RosterSource {
    fn id(&self) -> String {
        format!("{}#{}", self.path.display(), self.step_id)
    }

    async fn read(&self) -> Result<String, SourceError> {
        let content = read_file(&self.path).await?;
        if content.trim().is_empty() {
            return Ok(String::new());
        }
        let roster: Roster =
            serde_json::from_str(&content).map_err(|err| SourceError::InvalidRoster {
                path: self.path.display().to_string(),
                err,
            })?;

        let status = if listed(&roster.cancelling, &self.step_id) {
            StatusCode::Cancelling.name()
        } else if listed(&roster.timing_out, &self.step_id) {
            StatusCode::TimingOut.name()
        } else {
            ""
        };
        Ok(status.to_string())
    }
}

async fn read_file(path: &Path) -> Result<String, SourceError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|err| SourceError::Read {
            path: path.display().to_string(),
            err,
        })
}
