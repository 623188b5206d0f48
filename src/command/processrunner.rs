use super::{shutdown::ProcessTerminator, CommandError, CommandExecutor, CommandHandle, ProcessExit};
use async_trait::async_trait;
use std::{
    ffi::OsStr,
    path::Path,
    process::{ExitStatus, Stdio},
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::{Child, Command},
    task::JoinHandle,
};
use tracing::{error, trace};

/// Time granted to the output readers once the process exited. Descendants that inherited the
/// pipes may keep them open well after the script is gone.
const STREAM_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

pub struct Unstarted {
    cmd: Command,
    binary: String,
}

pub struct Started {
    child: Child,
    stdout: OutputReader,
    stderr: OutputReader,
}

pub struct ProcessRunner<State = Unstarted> {
    state: State,
}

impl ProcessRunner {
    /// Prepares `binary_path args...` with piped output. The process leads its own process group
    /// so termination signals reach everything it spawns.
    pub fn new<I, S>(binary_path: impl AsRef<OsStr>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let binary = binary_path.as_ref().to_string_lossy().to_string();
        let mut cmd = Command::new(binary_path);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(target_family = "unix")]
        cmd.process_group(0);

        Self {
            state: Unstarted { cmd, binary },
        }
    }

    /// Runs `exec_bin script env_file`, the way every unit script is invoked.
    pub fn for_script(exec_bin: &Path, script: &Path, env_file: &Path) -> Self {
        Self::new(exec_bin, [script.as_os_str(), env_file.as_os_str()])
    }

    /// Spawns the process and waits for it to exit.
    pub async fn run(self) -> Result<ProcessExit, CommandError> {
        self.start()?.wait().await
    }
}

impl CommandExecutor for ProcessRunner<Unstarted> {
    type Error = CommandError;
    type Process = ProcessRunner<Started>;

    fn start(mut self) -> Result<Self::Process, Self::Error> {
        let binary = self.state.binary;
        let mut child = self
            .state
            .cmd
            .spawn()
            .map_err(|err| CommandError::Spawn { binary, err })?;

        let stdout = child
            .stdout
            .take()
            .ok_or(CommandError::StreamPipeError("stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or(CommandError::StreamPipeError("stderr".to_string()))?;

        Ok(ProcessRunner {
            state: Started {
                child,
                stdout: OutputReader::spawn(stdout, "stdout"),
                stderr: OutputReader::spawn(stderr, "stderr"),
            },
        })
    }
}

#[async_trait]
impl CommandHandle for ProcessRunner<Started> {
    type Error = CommandError;

    async fn wait(mut self) -> Result<ProcessExit, Self::Error> {
        let status = self.state.child.wait().await?;
        let stdout = self.state.stdout.collect().await;
        let stderr = self.state.stderr.collect().await;
        Ok(ProcessExit::from_status(status, stdout, stderr))
    }

    fn get_pid(&self) -> Option<u32> {
        self.state.child.id()
    }
}

impl ProcessRunner<Started> {
    pub fn terminator(&self) -> Option<ProcessTerminator> {
        self.get_pid().map(ProcessTerminator::new)
    }
}

impl ProcessExit {
    fn from_status(status: ExitStatus, stdout: Vec<String>, stderr: Vec<String>) -> Self {
        #[cfg(target_family = "unix")]
        let signal = std::os::unix::process::ExitStatusExt::signal(&status);
        #[cfg(not(target_family = "unix"))]
        let signal = None;

        Self {
            exit_code: status.code(),
            signal,
            stdout,
            stderr,
        }
    }
}

/// Collects the lines of one output stream in the background.
struct OutputReader {
    lines: Arc<Mutex<Vec<String>>>,
    handle: JoinHandle<()>,
}

impl OutputReader {
    fn spawn<R>(stream: R, name: &'static str) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let handle = tokio::spawn({
            let lines = lines.clone();
            async move {
                let mut reader = BufReader::new(stream).lines();
                loop {
                    match reader.next_line().await {
                        Ok(Some(line)) => {
                            trace!(stream = name, %line);
                            if let Ok(mut lines) = lines.lock() {
                                lines.push(line);
                            }
                        }
                        Ok(None) => break,
                        Err(err) => {
                            error!("{name} stream error: {err}");
                            break;
                        }
                    }
                }
            }
        });
        Self { lines, handle }
    }

    async fn collect(mut self) -> Vec<String> {
        if tokio::time::timeout(STREAM_DRAIN_TIMEOUT, &mut self.handle)
            .await
            .is_err()
        {
            self.handle.abort();
        }
        self.lines
            .lock()
            .map(|mut lines| std::mem::take(&mut *lines))
            .unwrap_or_default()
    }
}
