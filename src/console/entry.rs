use chrono::Utc;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::time::Instant;
use ulid::Ulid;

/// Parent of every top level group.
pub const ROOT_PARENT: &str = "root";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EntryKind {
    #[serde(rename = "grp")]
    Group,
    #[serde(rename = "cmd")]
    Command,
    #[serde(rename = "msg")]
    Message,
}

/// One node of the console tree (group > command > message).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleEntry {
    pub console_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_console_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub message: String,
    /// Microseconds since the epoch.
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp_ended_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_success: Option<bool>,
    pub is_shown: bool,
}

impl ConsoleEntry {
    pub(super) fn open(
        kind: EntryKind,
        console_id: String,
        parent_console_id: Option<String>,
        message: String,
        timestamp: i64,
    ) -> Self {
        Self {
            console_id,
            parent_console_id,
            kind,
            message,
            timestamp,
            timestamp_ended_at: None,
            is_success: None,
            is_shown: true,
        }
    }

    pub(super) fn closed(self, ended_at: i64, success: bool) -> Self {
        Self {
            timestamp: ended_at,
            timestamp_ended_at: Some(ended_at),
            is_success: Some(success),
            ..self
        }
    }

    pub(super) fn hidden(self) -> Self {
        Self {
            is_shown: false,
            ..self
        }
    }
}

pub(super) fn new_console_id() -> String {
    Ulid::new().to_string().to_lowercase()
}

/// The remote record console entries are attached to.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleOwner {
    Steplet {
        steplet_id: String,
        pipeline_id: String,
    },
    Job {
        job_id: String,
    },
}

impl ConsoleOwner {
    pub fn id(&self) -> &str {
        match self {
            ConsoleOwner::Steplet { steplet_id, .. } => steplet_id,
            ConsoleOwner::Job { job_id } => job_id,
        }
    }

    pub fn path(&self) -> &'static str {
        match self {
            ConsoleOwner::Steplet { .. } => "/stepletConsoles",
            ConsoleOwner::Job { .. } => "/buildJobConsoles",
        }
    }
}

/// A drained buffer, ready to be posted in a single call.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsoleBatch {
    pub owner: ConsoleOwner,
    pub entries: Vec<ConsoleEntry>,
}

impl ConsoleBatch {
    pub fn path(&self) -> &'static str {
        self.owner.path()
    }
}

impl Serialize for ConsoleBatch {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match &self.owner {
            ConsoleOwner::Steplet {
                steplet_id,
                pipeline_id,
            } => {
                let mut map = serializer.serialize_map(Some(3))?;
                map.serialize_entry("stepletId", steplet_id)?;
                map.serialize_entry("pipelineId", pipeline_id)?;
                map.serialize_entry("stepConsoles", &self.entries)?;
                map.end()
            }
            ConsoleOwner::Job { job_id } => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("buildJobId", job_id)?;
                map.serialize_entry("buildJobConsoles", &self.entries)?;
                map.end()
            }
        }
    }
}

/// Wall clock anchor advanced by a monotonic clock, so timestamps keep their order across wall
/// clock adjustments.
#[derive(Debug, Clone, Copy)]
pub struct ConsoleClock {
    anchor_us: i64,
    started: Instant,
}

impl Default for ConsoleClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsoleClock {
    pub fn new() -> Self {
        Self {
            anchor_us: Utc::now().timestamp_micros(),
            started: Instant::now(),
        }
    }

    pub fn now_us(&self) -> i64 {
        let elapsed = i64::try_from(self.started.elapsed().as_micros()).unwrap_or(i64::MAX);
        self.anchor_us.saturating_add(elapsed)
    }
}
