use super::GroupError;
use crate::console::ConsoleOwner;
use crate::http::SubUnit;
use crate::supervisor::ExecutionRequest;
use crate::watcher::RosterSource;
use std::path::PathBuf;
use std::sync::Arc;

pub const SCRIPT_FILE: &str = "script.sh";
pub const ENV_FILE: &str = "script.env";

/// Turns a sub-unit fetched from the remote service into an [ExecutionRequest].
#[cfg_attr(test, mockall::automock)]
pub trait UnitPreparer: Send + Sync {
    fn prepare(&self, step_id: &str, unit: &SubUnit) -> Result<ExecutionRequest, GroupError>;
}

/// Finds the scripts of each unit under `<steps_dir>/<step_id>/<unit_id>/` and watches the
/// shared roster of terminating steps.
#[derive(Debug, Clone)]
pub struct ScriptLayout {
    steps_dir: PathBuf,
    roster_path: PathBuf,
    kill_script: Option<PathBuf>,
}

impl ScriptLayout {
    pub fn new(steps_dir: impl Into<PathBuf>, roster_path: impl Into<PathBuf>) -> Self {
        Self {
            steps_dir: steps_dir.into(),
            roster_path: roster_path.into(),
            kill_script: None,
        }
    }

    pub fn with_kill_script(self, kill_script: Option<PathBuf>) -> Self {
        Self {
            kill_script,
            ..self
        }
    }

    pub fn unit_dir(&self, step_id: &str, unit_id: &str) -> PathBuf {
        self.steps_dir.join(step_id).join(unit_id)
    }
}

/// Container the steps of a node run in.
pub fn container_name(step_id: &str) -> String {
    format!("step-{step_id}")
}

impl UnitPreparer for ScriptLayout {
    fn prepare(&self, step_id: &str, unit: &SubUnit) -> Result<ExecutionRequest, GroupError> {
        let dir = self.unit_dir(step_id, &unit.id);
        let script = dir.join(SCRIPT_FILE);
        if !script.is_file() {
            return Err(GroupError::MissingScript(script.display().to_string()));
        }

        Ok(ExecutionRequest::new(
            unit.id.as_str(),
            script,
            dir.join(ENV_FILE),
            ConsoleOwner::Steplet {
                steplet_id: unit.id.clone(),
                pipeline_id: unit.pipeline_id.clone(),
            },
        )
        .with_kill_script(self.kill_script.clone())
        .with_container(Some(container_name(step_id)))
        .with_signal(Arc::new(RosterSource::new(&self.roster_path, step_id))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tempfile::tempdir;

    fn unit() -> SubUnit {
        SubUnit {
            id: "21".to_string(),
            step_id: "3".to_string(),
            pipeline_id: "1".to_string(),
        }
    }

    #[test]
    fn prepares_request_from_layout() {
        let dir = tempdir().unwrap();
        let layout = ScriptLayout::new(dir.path().join("steps"), dir.path().join("step.status"))
            .with_kill_script(Some(PathBuf::from("/opt/kill.sh")));
        let unit_dir = layout.unit_dir("3", "21");
        std::fs::create_dir_all(&unit_dir).unwrap();
        std::fs::write(unit_dir.join(SCRIPT_FILE), "exit 0").unwrap();

        let request = layout.prepare("3", &unit()).unwrap();

        assert_eq!(request.unit_id(), "21");
        assert_eq!(request.script_path(), &unit_dir.join(SCRIPT_FILE));
        assert_eq!(request.env_path(), &unit_dir.join(ENV_FILE));
        assert_eq!(request.container(), Some("step-3"));
        assert_eq!(request.kill_script(), Some(&PathBuf::from("/opt/kill.sh")));
        assert_eq!(
            request.console(),
            &ConsoleOwner::Steplet {
                steplet_id: "21".to_string(),
                pipeline_id: "1".to_string()
            }
        );
        assert!(request.validate().is_ok());
    }

    #[test]
    fn missing_script_is_an_error() {
        let dir = tempdir().unwrap();
        let layout = ScriptLayout::new(dir.path(), dir.path().join("step.status"));
        assert_matches!(
            layout.prepare("3", &unit()),
            Err(GroupError::MissingScript(_))
        );
    }
}
