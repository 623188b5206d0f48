use super::error::SupervisorError;
use crate::command::{ProcessExit, SENTINEL_ERROR_EXIT_CODE};
use crate::console::ConsoleOwner;
use crate::status::StatusCode;
use crate::watcher::StatusSource;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// One unit of work handed to the supervisor. Immutable once built.
#[derive(Clone)]
pub struct ExecutionRequest {
    unit_id: String,
    script_path: PathBuf,
    env_path: PathBuf,
    kill_script: Option<PathBuf>,
    container: Option<String>,
    signal: Option<Arc<dyn StatusSource>>,
    console: ConsoleOwner,
}

impl fmt::Debug for ExecutionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionRequest")
            .field("unit_id", &self.unit_id)
            .field("script_path", &self.script_path)
            .field("env_path", &self.env_path)
            .field("kill_script", &self.kill_script)
            .field("container", &self.container)
            .field("signal", &self.signal.as_ref().map(|s| s.id()))
            .field("console", &self.console)
            .finish()
    }
}

impl ExecutionRequest {
    pub fn new(
        unit_id: impl Into<String>,
        script_path: impl Into<PathBuf>,
        env_path: impl Into<PathBuf>,
        console: ConsoleOwner,
    ) -> Self {
        Self {
            unit_id: unit_id.into(),
            script_path: script_path.into(),
            env_path: env_path.into(),
            kill_script: None,
            container: None,
            signal: None,
            console,
        }
    }

    pub fn with_kill_script(self, kill_script: Option<PathBuf>) -> Self {
        Self {
            kill_script,
            ..self
        }
    }

    pub fn with_container(self, container: Option<String>) -> Self {
        Self { container, ..self }
    }

    pub fn with_signal(self, signal: Arc<dyn StatusSource>) -> Self {
        Self {
            signal: Some(signal),
            ..self
        }
    }

    pub fn unit_id(&self) -> &str {
        &self.unit_id
    }

    pub fn script_path(&self) -> &PathBuf {
        &self.script_path
    }

    pub fn env_path(&self) -> &PathBuf {
        &self.env_path
    }

    pub fn kill_script(&self) -> Option<&PathBuf> {
        self.kill_script.as_ref()
    }

    pub fn container(&self) -> Option<&str> {
        self.container.as_deref()
    }

    pub fn signal(&self) -> Option<&Arc<dyn StatusSource>> {
        self.signal.as_ref()
    }

    pub fn console(&self) -> &ConsoleOwner {
        &self.console
    }

    /// Lists every missing input at once.
    pub fn validate(&self) -> Result<(), SupervisorError> {
        let mut missing = Vec::new();
        if self.unit_id.trim().is_empty() {
            missing.push("unit id".to_string());
        }
        if self.script_path.as_os_str().is_empty() {
            missing.push("script path".to_string());
        }
        if self.env_path.as_os_str().is_empty() {
            missing.push("env path".to_string());
        }
        if self.signal.is_none() {
            missing.push("status signal".to_string());
        }
        if self.console.id().trim().is_empty() {
            missing.push("console owner".to_string());
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(SupervisorError::Precondition(missing))
        }
    }
}

/// Status a finished process maps to when nothing else decided it.
pub fn status_from_exit(exit_code: Option<i32>, signal: Option<i32>) -> StatusCode {
    match (exit_code, signal) {
        (Some(SENTINEL_ERROR_EXIT_CODE), _) => StatusCode::Error,
        (Some(0), None) => StatusCode::Success,
        _ => StatusCode::Failure,
    }
}

/// Outcome of one unit. Built once, when the final status is decided.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    exit_code: Option<i32>,
    signal: Option<i32>,
    status: StatusCode,
    skipped_status_update: bool,
}

impl ExecutionResult {
    pub(super) fn new(
        exit: Option<&ProcessExit>,
        status: StatusCode,
        skipped_status_update: bool,
    ) -> Self {
        Self {
            exit_code: exit.and_then(|e| e.exit_code),
            signal: exit.and_then(|e| e.signal),
            status,
            skipped_status_update,
        }
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    pub fn signal(&self) -> Option<i32> {
        self.signal
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// True when the final status was owned by the controller and not sent by the agent.
    pub fn skipped_status_update(&self) -> bool {
        self.skipped_status_update
    }
}
