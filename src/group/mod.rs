//! Affinity group loop: runs every step the remote service assigns to this node, one unit at a
//! time, until the service reports the group complete.
pub mod preparer;

use crate::http::{ApiError, JobApi, StatusUpdate, SubUnit};
use crate::status::{StatusCode, SystemCodes};
use crate::supervisor::ExecutionSupervisor;
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

pub use preparer::{container_name, ScriptLayout, UnitPreparer};

/// Upper bound of concurrent `queued` updates sent for the units of a step.
pub const MAX_CONCURRENT_QUEUED_UPDATES: usize = 5;

#[derive(Error, Debug)]
pub enum GroupError {
    #[error("could not mark cluster node `{node_id}` as processing: {err}")]
    ClusterNode { node_id: String, err: ApiError },
    #[error("unit script `{0}` not found")]
    MissingScript(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupAssignment {
    pub run_id: String,
    pub affinity_group: String,
}

/// Final status of one unit, `None` when it could not be executed at all.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitOutcome {
    pub step_id: String,
    pub unit_id: String,
    pub status: Option<StatusCode>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupSummary {
    pub steps: Vec<String>,
    pub units: Vec<UnitOutcome>,
}

impl GroupSummary {
    pub fn status_of(&self, unit_id: &str) -> Option<StatusCode> {
        self.units
            .iter()
            .find(|u| u.unit_id == unit_id)
            .and_then(|u| u.status)
    }
}

pub struct GroupExecutor<A, P> {
    api: Arc<A>,
    supervisor: ExecutionSupervisor<A>,
    preparer: P,
    codes: SystemCodes,
    node_id: String,
    pipelines_dir: PathBuf,
}

impl<A, P> GroupExecutor<A, P>
where
    A: JobApi,
    P: UnitPreparer,
{
    pub fn new(
        api: Arc<A>,
        supervisor: ExecutionSupervisor<A>,
        preparer: P,
        codes: SystemCodes,
        node_id: impl Into<String>,
        pipelines_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            api,
            supervisor,
            preparer,
            codes,
            node_id: node_id.into(),
            pipelines_dir: pipelines_dir.into(),
        }
    }

    /// Runs the group to completion. Only the initial cluster node update can fail it, problems
    /// with a step or a unit are logged and the loop goes on.
    pub async fn execute(&self, assignment: &GroupAssignment) -> Result<GroupSummary, GroupError> {
        let run_id = assignment.run_id.as_str();
        let group = assignment.affinity_group.as_str();
        info!(%run_id, %group, node_id = %self.node_id, "Executing affinity group");

        let processing = StatusUpdate::new(self.codes.code(StatusCode::Processing));
        self.api
            .put_cluster_node(&self.node_id, &processing)
            .await
            .map_err(|err| GroupError::ClusterNode {
                node_id: self.node_id.clone(),
                err,
            })?;

        clean_dir(&self.pipelines_dir).await;

        let mut summary = GroupSummary::default();
        loop {
            let step_id = match self.api.get_next_step(run_id, group).await {
                Ok(Some(step_id)) => step_id,
                Ok(None) => {
                    info!(%run_id, %group, "Affinity group complete");
                    break;
                }
                Err(err) => {
                    warn!(%run_id, %group, "Failed to get next step, ending the group: {err}");
                    break;
                }
            };
            summary.steps.push(step_id.clone());
            self.execute_step(&step_id, &mut summary).await;
        }

        clean_dir(&self.pipelines_dir).await;
        Ok(summary)
    }

    async fn execute_step(&self, step_id: &str, summary: &mut GroupSummary) {
        let units = match self.api.get_sub_units(step_id).await {
            Ok(units) => units,
            Err(err) => {
                warn!(%step_id, "Failed to get units of step: {err}");
                self.put_step_status(step_id, StatusCode::Error).await;
                return;
            }
        };

        self.put_step_status(step_id, StatusCode::Queued).await;
        self.mark_units_queued(&units).await;

        for unit in &units {
            let status = self.execute_unit(step_id, unit).await;
            summary.units.push(UnitOutcome {
                step_id: step_id.to_string(),
                unit_id: unit.id.clone(),
                status,
            });
        }
    }

    async fn execute_unit(&self, step_id: &str, unit: &SubUnit) -> Option<StatusCode> {
        let unit_id = unit.id.as_str();
        let request = match self.preparer.prepare(step_id, unit) {
            Ok(request) => request,
            Err(err) => {
                error!(%step_id, %unit_id, "Unit could not be prepared: {err}");
                let update = StatusUpdate::new(self.codes.code(StatusCode::Error)).ended_now();
                if let Err(err) = self.api.put_unit_status(unit_id, &update).await {
                    warn!(%unit_id, "Failed to update unit status: {err}");
                }
                return None;
            }
        };

        match self.supervisor.execute(&request).await {
            Ok(result) => {
                debug!(%step_id, %unit_id, status = %result.status(), "Unit done");
                Some(result.status())
            }
            Err(err) => {
                error!(%step_id, %unit_id, "Unit ended with error: {err}");
                None
            }
        }
    }

    async fn put_step_status(&self, step_id: &str, status: StatusCode) {
        let update = StatusUpdate::new(self.codes.code(status));
        if let Err(err) = self.api.put_step_status(step_id, &update).await {
            warn!(%step_id, "Failed to update step status to {status}: {err}");
        }
    }

    async fn mark_units_queued(&self, units: &[SubUnit]) {
        let queued = StatusUpdate::new(self.codes.code(StatusCode::Queued));
        stream::iter(units)
            .for_each_concurrent(MAX_CONCURRENT_QUEUED_UPDATES, |unit| {
                let queued = &queued;
                async move {
                    if let Err(err) = self.api.put_unit_status(&unit.id, queued).await {
                        warn!(unit_id = %unit.id, "Failed to mark unit as queued: {err}");
                    }
                }
            })
            .await;
    }
}

/// Empties `dir`, creating it when missing. Failures are logged.
async fn clean_dir(dir: &Path) {
    if let Err(err) = try_clean_dir(dir).await {
        warn!(dir = %dir.display(), "Directory cleanup failed: {err}");
    }
}

async fn try_clean_dir(dir: &Path) -> std::io::Result<()> {
    match tokio::fs::read_dir(dir).await {
        Ok(mut entries) => {
            while let Some(entry) = entries.next_entry().await? {
                if entry.file_type().await?.is_dir() {
                    tokio::fs::remove_dir_all(entry.path()).await?;
                } else {
                    tokio::fs::remove_file(entry.path()).await?;
                }
            }
            Ok(())
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tokio::fs::create_dir_all(dir).await
        }
        Err(err) => Err(err),
    }
}
