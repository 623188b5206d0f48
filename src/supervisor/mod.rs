//! Runs a single unit of work and owns its status lifecycle.
//!
//! `processing` is reported before the unit script starts. The script then races the unit's
//! terminating signal: when the process exits first its exit code decides the final status, when
//! the signal wins the process is terminated and the status belongs to the controller, so it is
//! never overwritten.
mod error;
mod markers;
mod request;
#[allow(clippy::module_inception)]
mod supervisor;

pub use error::{MarkerError, SupervisorError};
pub use markers::{ExecutionOwner, HandoffMarkers};
pub use request::{status_from_exit, ExecutionRequest, ExecutionResult};
pub use supervisor::{
    ExecutionSupervisor, SupervisorSettings, UnitState, DEBUG_LOGS_GROUP, ERRORS_COMMAND,
};
