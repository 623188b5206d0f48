mod error;
mod processrunner;
mod shutdown;

use async_trait::async_trait;

pub use error::CommandError;
pub use processrunner::{ProcessRunner, Started, Unstarted};
pub use shutdown::{KillHook, ProcessTerminator};

/// Exit code a script uses to report an error of its own, as opposed to a failed build.
pub const SENTINEL_ERROR_EXIT_CODE: i32 = 199;

/// Trait that specifies the interface for process execution
pub trait CommandExecutor {
    type Error: std::error::Error + Send + Sync;
    type Process: CommandHandle;

    /// The start method will spawn the process
    fn start(self) -> Result<Self::Process, Self::Error>;
}

/// Handle over a spawned process
#[async_trait]
pub trait CommandHandle: Send {
    type Error: std::error::Error + Send + Sync;

    /// Resolves once the process exits, consuming the handle
    async fn wait(self) -> Result<ProcessExit, Self::Error>;

    /// None once the process has been reaped
    fn get_pid(&self) -> Option<u32>;
}

/// How a process ended, along with the output it produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessExit {
    pub exit_code: Option<i32>,
    /// Signal that ended the process, if any.
    pub signal: Option<i32>,
    /// Kept for diagnostics only.
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
}

impl ProcessExit {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0) && self.signal.is_none()
    }
}
