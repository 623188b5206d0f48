pub mod error;
pub mod loader;

use crate::console::ConsoleSettings;
use crate::http::HttpConfig;
use crate::logging::RunMode;
use crate::supervisor::SupervisorSettings;
use duration_str::deserialize_duration;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

pub use error::ConfigError;
pub use loader::ConfigLoader;

pub const DEFAULT_API_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_API_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_STATUS_POLL_INTERVAL: Duration = Duration::from_secs(15);
pub const DEFAULT_TERMINATION_GRACE: Duration = Duration::from_secs(10);

/// Agent configuration, loaded once at startup and handed down to every component.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AgentConfig {
    pub api: ApiConfig,
    /// Cluster node this agent runs on, required to execute affinity groups.
    #[serde(default)]
    pub node_id: String,
    /// Interpreter every unit script is run with.
    pub exec_bin_path: PathBuf,
    /// Holds the `status`, `markers`, `steps` and `pipelines` directories.
    pub base_dir: PathBuf,
    #[serde(
        default = "default_status_poll_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub status_poll_interval: Duration,
    #[serde(default)]
    pub console: ConsoleSettings,
    #[serde(default)]
    pub kill_script: Option<PathBuf>,
    #[serde(
        default = "default_termination_grace",
        deserialize_with = "deserialize_duration"
    )]
    pub termination_grace: Duration,
    #[serde(default)]
    pub run_mode: RunMode,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ApiConfig {
    pub url: String,
    pub token: String,
    #[serde(
        default = "default_api_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub timeout: Duration,
    #[serde(
        default = "default_api_connect_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub connect_timeout: Duration,
}

fn default_api_timeout() -> Duration {
    DEFAULT_API_TIMEOUT
}

fn default_api_connect_timeout() -> Duration {
    DEFAULT_API_CONNECT_TIMEOUT
}

fn default_status_poll_interval() -> Duration {
    DEFAULT_STATUS_POLL_INTERVAL
}

fn default_termination_grace() -> Duration {
    DEFAULT_TERMINATION_GRACE
}

impl AgentConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("api.url", self.api.url.trim().is_empty()),
            ("api.token", self.api.token.trim().is_empty()),
            ("exec_bin_path", self.exec_bin_path.as_os_str().is_empty()),
            ("base_dir", self.base_dir.as_os_str().is_empty()),
        ];
        if let Some((name, _)) = required.into_iter().find(|(_, missing)| *missing) {
            return Err(ConfigError::MissingValue(name));
        }

        let intervals = [
            ("api.timeout", self.api.timeout),
            ("api.connect_timeout", self.api.connect_timeout),
            ("status_poll_interval", self.status_poll_interval),
            ("console.flush_interval", self.console.flush_interval),
            ("console.drain_timeout", self.console.drain_timeout),
            ("termination_grace", self.termination_grace),
        ];
        if let Some((name, _)) = intervals.into_iter().find(|(_, d)| d.is_zero()) {
            return Err(ConfigError::NonPositiveInterval(name));
        }

        if self.console.batch_size == 0 {
            return Err(ConfigError::NonPositiveSize("console.batch_size"));
        }
        Ok(())
    }

    pub fn node_id(&self) -> Result<&str, ConfigError> {
        match self.node_id.trim() {
            "" => Err(ConfigError::MissingValue("node_id")),
            node_id => Ok(node_id),
        }
    }

    pub fn status_dir(&self) -> PathBuf {
        self.base_dir.join("status")
    }

    pub fn markers_dir(&self) -> PathBuf {
        self.base_dir.join("markers")
    }

    /// Unit scripts, laid out as `<steps_dir>/<step_id>/<unit_id>/`.
    pub fn steps_dir(&self) -> PathBuf {
        self.base_dir.join("steps")
    }

    pub fn pipelines_dir(&self) -> PathBuf {
        self.base_dir.join("pipelines")
    }

    /// Roster of terminating steps written by the controller.
    pub fn roster_path(&self) -> PathBuf {
        self.status_dir().join("step.status")
    }

    pub fn http_config(&self) -> HttpConfig {
        HttpConfig::new(self.api.timeout, self.api.connect_timeout)
    }

    pub fn supervisor_settings(&self) -> SupervisorSettings {
        SupervisorSettings {
            exec_bin: self.exec_bin_path.clone(),
            poll_interval: self.status_poll_interval,
            termination_grace: self.termination_grace,
            console: self.console.clone(),
        }
    }
}
