#[cfg(target_family = "unix")]
use nix::{
    sys::signal::{self, Signal},
    unistd::Pid,
};
use std::path::PathBuf;
use tokio::process::Command;
use tracing::{debug, warn};

use super::CommandError;

/// External teardown script run before signalling the process, typically to stop the container
/// the unit runs in.
#[derive(Debug, Clone, PartialEq)]
pub struct KillHook {
    exec_bin: PathBuf,
    script: PathBuf,
    container: Option<String>,
}

impl KillHook {
    pub fn new(exec_bin: impl Into<PathBuf>, script: impl Into<PathBuf>) -> Self {
        Self {
            exec_bin: exec_bin.into(),
            script: script.into(),
            container: None,
        }
    }

    pub fn with_container(self, container: Option<String>) -> Self {
        Self { container, ..self }
    }

    /// Runs `exec_bin script [container]` and waits for it to exit.
    pub async fn run(&self) -> Result<(), CommandError> {
        let status = Command::new(&self.exec_bin)
            .arg(&self.script)
            .args(self.container.as_deref())
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|err| CommandError::Spawn {
                binary: self.exec_bin.display().to_string(),
                err,
            })?;

        if status.success() {
            Ok(())
        } else {
            Err(CommandError::KillScript {
                script: self.script.display().to_string(),
                outcome: status.to_string(),
            })
        }
    }
}

/// Delivers termination signals to a running process and its process group.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessTerminator {
    pid: u32,
}

impl ProcessTerminator {
    pub fn new(pid: u32) -> Self {
        Self { pid }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Best effort, two phase termination: runs the kill hook if any and then sends SIGTERM
    /// whatever the hook outcome. Failures are logged, the process exit is the only confirmation.
    pub async fn request_termination(&self, hook: Option<&KillHook>) {
        if let Some(hook) = hook {
            match hook.run().await {
                Ok(()) => debug!(pid = self.pid, "Kill script finished"),
                Err(err) => warn!(pid = self.pid, "Failed to execute kill script: {err}"),
            }
        }
        if let Err(err) = self.terminate() {
            warn!(pid = self.pid, "Failed to terminate process: {err}");
        }
    }

    /// Sends SIGKILL, used once the grace period after [Self::request_termination] expires.
    pub fn force_kill(&self) {
        if let Err(err) = self.kill() {
            warn!(pid = self.pid, "Failed to kill process: {err}");
        }
    }

    #[cfg(target_family = "unix")]
    pub fn terminate(&self) -> Result<(), CommandError> {
        self.signal(Signal::SIGTERM)
    }

    #[cfg(target_family = "unix")]
    pub fn kill(&self) -> Result<(), CommandError> {
        self.signal(Signal::SIGKILL)
    }

    #[cfg(target_family = "unix")]
    fn signal(&self, sig: Signal) -> Result<(), CommandError> {
        debug!(pid = self.pid, signal = %sig, "Sending signal");
        let pid = Pid::from_raw(self.pid as i32);
        // the process leads its own group, reaching the group reaches its descendants too
        signal::killpg(pid, sig).or_else(|_| signal::kill(pid, sig))?;
        Ok(())
    }

    #[cfg(not(target_family = "unix"))]
    pub fn terminate(&self) -> Result<(), CommandError> {
        Err(CommandError::Unsupported)
    }

    #[cfg(not(target_family = "unix"))]
    pub fn kill(&self) -> Result<(), CommandError> {
        Err(CommandError::Unsupported)
    }
}
