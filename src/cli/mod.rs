use crate::config::{AgentConfig, ConfigError, ConfigLoader};
use crate::console::ConsoleOwner;
use crate::group::{GroupAssignment, GroupError};
use crate::http::{ApiError, HttpClientError};
use crate::logging::{Logging, LoggingError};
use crate::status::StatusCodeError;
use crate::supervisor::{ExecutionRequest, SupervisorError};
use crate::watcher::FileSource;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use tracing::info;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("could not read agent config: `{0}`")]
    ConfigRead(#[from] ConfigError),
    #[error("could not initialize logging: `{0}`")]
    LoggingInit(#[from] LoggingError),
    #[error("could not build the http client: `{0}`")]
    HttpClient(#[from] HttpClientError),
    #[error("could not load system codes: `{0}`")]
    SystemCodesLoad(#[from] ApiError),
    #[error("invalid system codes: `{0}`")]
    SystemCodes(#[from] StatusCodeError),
    #[error("affinity group failed: `{0}`")]
    Group(#[from] GroupError),
    #[error("unit rejected: `{0}`")]
    Unit(#[from] SupervisorError),
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)] // Read from `Cargo.toml`
pub struct Cli {
    /// Path of the agent YAML configuration.
    #[arg(short, long)]
    config: PathBuf,

    /// Overrides the level derived from the configured run mode.
    #[arg(long)]
    log_level: Option<LevelFilter>,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CliCommand {
    /// Runs every step of an affinity group assigned to this node.
    Group(GroupArgs),
    /// Runs a single unit script.
    Unit(UnitArgs),
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct GroupArgs {
    #[arg(long)]
    pub run_id: String,
    #[arg(long)]
    pub affinity_group: String,
}

impl From<GroupArgs> for GroupAssignment {
    fn from(value: GroupArgs) -> Self {
        GroupAssignment {
            run_id: value.run_id,
            affinity_group: value.affinity_group,
        }
    }
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct UnitArgs {
    #[arg(long)]
    pub unit_id: String,
    #[arg(long)]
    pub script: PathBuf,
    #[arg(long)]
    pub env: PathBuf,
    /// Defaults to the kill script of the agent config.
    #[arg(long)]
    pub kill_script: Option<PathBuf>,
    #[arg(long)]
    pub container: Option<String>,
    /// Defaults to `<base_dir>/status/<unit_id>.status`.
    #[arg(long)]
    pub signal_file: Option<PathBuf>,
    /// Console entries go to the steplet of this pipeline when set, to the build job otherwise.
    #[arg(long)]
    pub pipeline_id: Option<String>,
}

impl UnitArgs {
    pub fn request(&self, config: &AgentConfig) -> ExecutionRequest {
        let signal_file = self.signal_file.clone().unwrap_or_else(|| {
            config
                .status_dir()
                .join(format!("{}.status", self.unit_id))
        });
        let console = match &self.pipeline_id {
            Some(pipeline_id) => ConsoleOwner::Steplet {
                steplet_id: self.unit_id.clone(),
                pipeline_id: pipeline_id.clone(),
            },
            None => ConsoleOwner::Job {
                job_id: self.unit_id.clone(),
            },
        };

        ExecutionRequest::new(
            self.unit_id.as_str(),
            self.script.clone(),
            self.env.clone(),
            console,
        )
        .with_kill_script(
            self.kill_script
                .clone()
                .or_else(|| config.kill_script.clone()),
        )
        .with_container(self.container.clone())
        .with_signal(Arc::new(FileSource::new(signal_file)))
    }
}

/// Everything the binary needs once the command line has been processed.
pub struct AgentCliConfig {
    pub config: AgentConfig,
    pub command: CliCommand,
}

impl Cli {
    /// Parses command line arguments, loads the agent config and initializes logging.
    pub fn init() -> Result<AgentCliConfig, CliError> {
        Self::parse().into_cli_config()
    }

    fn into_cli_config(self) -> Result<AgentCliConfig, CliError> {
        let config = ConfigLoader::load(&self.config)?;
        Logging::try_init(self.level(&config))?;
        info!(
            "Starting build agent with config '{}'",
            self.config.to_string_lossy()
        );
        Ok(AgentCliConfig {
            config,
            command: self.command,
        })
    }

    fn level(&self, config: &AgentConfig) -> LevelFilter {
        self.log_level.unwrap_or_else(|| config.run_mode.level())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigLoader;

    fn config() -> AgentConfig {
        ConfigLoader::from_yaml(
            r#"
api:
  url: http://localhost
  token: t
exec_bin_path: /bin/sh
base_dir: /agent
kill_script: /agent/kill.sh
run_mode: beta
"#,
        )
        .unwrap()
    }

    #[test]
    fn parses_group_command() {
        let cli = Cli::try_parse_from([
            "build-agent",
            "--config",
            "/etc/agent.yaml",
            "group",
            "--run-id",
            "12",
            "--affinity-group",
            "build",
        ])
        .unwrap();

        assert_eq!(cli.config, PathBuf::from("/etc/agent.yaml"));
        assert_eq!(cli.level(&config()), LevelFilter::INFO);
        let CliCommand::Group(args) = cli.command else {
            panic!("expected the group command");
        };
        assert_eq!(
            GroupAssignment::from(args),
            GroupAssignment {
                run_id: "12".to_string(),
                affinity_group: "build".to_string()
            }
        );
    }

    #[test]
    fn log_level_flag_overrides_run_mode() {
        let cli = Cli::try_parse_from([
            "build-agent",
            "-c",
            "/etc/agent.yaml",
            "--log-level",
            "trace",
            "unit",
            "--unit-id",
            "3",
            "--script",
            "/s.sh",
            "--env",
            "/s.env",
        ])
        .unwrap();
        assert_eq!(cli.level(&config()), LevelFilter::TRACE);
    }

    #[test]
    fn unit_request_defaults() {
        let args = UnitArgs {
            unit_id: "3".to_string(),
            script: PathBuf::from("/s.sh"),
            env: PathBuf::from("/s.env"),
            kill_script: None,
            container: None,
            signal_file: None,
            pipeline_id: None,
        };

        let request = args.request(&config());

        assert_eq!(request.kill_script(), Some(&PathBuf::from("/agent/kill.sh")));
        assert_eq!(
            request.console(),
            &ConsoleOwner::Job {
                job_id: "3".to_string()
            }
        );
        assert_eq!(
            request.signal().map(|s| s.id()),
            Some("/agent/status/3.status".to_string())
        );
        assert!(request.validate().is_ok());
    }

    #[test]
    fn unit_request_with_pipeline_posts_steplet_consoles() {
        let args = UnitArgs {
            unit_id: "3".to_string(),
            script: PathBuf::from("/s.sh"),
            env: PathBuf::from("/s.env"),
            kill_script: Some(PathBuf::from("/k.sh")),
            container: Some("c1".to_string()),
            signal_file: Some(PathBuf::from("/signal")),
            pipeline_id: Some("8".to_string()),
        };

        let request = args.request(&config());

        assert_eq!(request.kill_script(), Some(&PathBuf::from("/k.sh")));
        assert_eq!(request.container(), Some("c1"));
        assert_eq!(request.console().path(), "/stepletConsoles");
    }

    #[test]
    fn missing_subcommand_is_rejected() {
        assert!(Cli::try_parse_from(["build-agent", "--config", "/c.yaml"]).is_err());
    }
}
