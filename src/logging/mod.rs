use serde::Deserialize;
use std::fmt::Debug;
use thiserror::Error;
use tracing::metadata::LevelFilter;
use tracing_subscriber::fmt::format::PrettyFields;
use tracing_subscriber::EnvFilter;

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("init logging error: `{0}`")]
    TryInitError(String),
}

/// Deployment flavour of the agent, which decides how verbose it is by default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Devmode,
    Beta,
    #[default]
    Production,
    #[serde(other)]
    Unknown,
}

impl RunMode {
    pub fn level(&self) -> LevelFilter {
        match self {
            RunMode::Devmode => LevelFilter::DEBUG,
            RunMode::Beta => LevelFilter::INFO,
            RunMode::Production | RunMode::Unknown => LevelFilter::WARN,
        }
    }
}

pub struct Logging;

impl Logging {
    /// Installs the global subscriber. `RUST_LOG` directives take precedence over `level`.
    pub fn try_init(level: LevelFilter) -> Result<(), LoggingError> {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::builder()
                    .with_default_directive(level.into())
                    .from_env_lossy(),
            )
            .fmt_fields(PrettyFields::new())
            .with_writer(std::io::stderr)
            .try_init()
            .map_err(|_| {
                LoggingError::TryInitError(
                    "unable to set agent global logging subscriber".to_string(),
                )
            })
    }
}
