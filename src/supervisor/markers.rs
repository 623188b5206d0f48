use super::error::MarkerError;
use crate::status::StatusCode;
use std::fmt;
use std::path::PathBuf;

const OWNER_FILE: &str = "owner";
const STATUS_FILE: &str = "status";

/// Who is in charge of the node's execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOwner {
    Agent,
    Controller,
}

impl ExecutionOwner {
    fn as_str(&self) -> &'static str {
        match self {
            ExecutionOwner::Agent => "agent",
            ExecutionOwner::Controller => "controller",
        }
    }
}

impl fmt::Display for ExecutionOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for ExecutionOwner {
    type Error = MarkerError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.trim() {
            "agent" => Ok(ExecutionOwner::Agent),
            "controller" => Ok(ExecutionOwner::Controller),
            other => Err(MarkerError::UnknownOwner(other.to_string())),
        }
    }
}

/// Files shared with the local bootstrap loop: the current execution owner and the last final
/// status.
#[derive(Debug, Clone)]
pub struct HandoffMarkers {
    dir: PathBuf,
}

impl HandoffMarkers {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub async fn write_owner(&self, owner: ExecutionOwner) -> Result<(), MarkerError> {
        self.write(OWNER_FILE, owner.as_str()).await
    }

    pub async fn write_status(&self, status: StatusCode) -> Result<(), MarkerError> {
        self.write(STATUS_FILE, status.name()).await
    }

    pub async fn read_owner(&self) -> Result<ExecutionOwner, MarkerError> {
        ExecutionOwner::try_from(self.read(OWNER_FILE).await?.as_str())
    }

    /// `None` when the stored value is not a known status.
    pub async fn read_status(&self) -> Result<Option<StatusCode>, MarkerError> {
        Ok(StatusCode::from_name(self.read(STATUS_FILE).await?.trim()))
    }

    async fn write(&self, name: &str, value: &str) -> Result<(), MarkerError> {
        let path = self.dir.join(name);
        let write_err = |err| MarkerError::Write {
            path: path.display().to_string(),
            err,
        };
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(write_err)?;
        tokio::fs::write(&path, value).await.map_err(write_err)
    }

    async fn read(&self, name: &str) -> Result<String, MarkerError> {
        let path = self.dir.join(name);
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|err| MarkerError::Read {
                path: path.display().to_string(),
                err,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tempfile::tempdir;

    #[tokio::test]
    async fn markers_are_created_and_overwritten() {
        let dir = tempdir().unwrap();
        let markers = HandoffMarkers::new(dir.path().join("markers"));

        markers.write_owner(ExecutionOwner::Agent).await.unwrap();
        markers.write_owner(ExecutionOwner::Controller).await.unwrap();
        markers.write_status(StatusCode::TimingOut).await.unwrap();

        assert_eq!(
            markers.read_owner().await.unwrap(),
            ExecutionOwner::Controller
        );
        assert_eq!(
            markers.read_status().await.unwrap(),
            Some(StatusCode::TimingOut)
        );
        assert_eq!(
            std::fs::read_to_string(dir.path().join("markers/owner")).unwrap(),
            "controller"
        );
    }

    #[tokio::test]
    async fn unknown_owner_is_rejected() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("owner"), "someone").unwrap();
        let markers = HandoffMarkers::new(dir.path());

        assert_matches!(
            markers.read_owner().await,
            Err(MarkerError::UnknownOwner(owner)) if owner == "someone"
        );
    }

    #[tokio::test]
    async fn write_into_a_file_path_fails() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("file");
        std::fs::write(&file, "").unwrap();
        let markers = HandoffMarkers::new(&file);

        assert_matches!(
            markers.write_status(StatusCode::Success).await,
            Err(MarkerError::Write { .. })
        );
    }
}
