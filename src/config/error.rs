use std::fmt::Debug;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("error loading config: `{0}`")]
    IOError(#[from] std::io::Error),

    #[error("`{0}`")]
    InvalidYamlConfiguration(#[from] serde_yaml::Error),

    #[error("missing required config value: `{0}`")]
    MissingValue(&'static str),

    #[error("config value `{0}` must be a positive duration")]
    NonPositiveInterval(&'static str),

    #[error("config value `{0}` must be greater than zero")]
    NonPositiveSize(&'static str),
}
