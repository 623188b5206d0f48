use super::{AgentConfig, ConfigError};
use std::path::Path;

pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads and validates the YAML config file at `path`.
    pub fn load(path: &Path) -> Result<AgentConfig, ConfigError> {
        let file = std::fs::File::open(path)?;
        let config: AgentConfig = serde_yaml::from_reader(file)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<AgentConfig, ConfigError> {
        let config: AgentConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }
}
