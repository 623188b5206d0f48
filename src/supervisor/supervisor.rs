use super::error::SupervisorError;
use super::markers::{ExecutionOwner, HandoffMarkers};
use super::request::{status_from_exit, ExecutionRequest, ExecutionResult};
use crate::command::{
    CommandExecutor, CommandHandle, KillHook, ProcessExit, ProcessRunner,
};
use crate::console::{ConsoleBuffer, ConsoleSettings, ConsoleSink};
use crate::http::{JobApi, StatusUpdate};
use crate::status::{StatusCode, SystemCodes, TerminatingSignal};
use crate::watcher::{StatusSource, StatusWatcher};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

pub const DEBUG_LOGS_GROUP: &str = "debug logs";
pub const ERRORS_COMMAND: &str = "Errors";

#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    /// Interpreter every script and kill script is run with.
    pub exec_bin: PathBuf,
    pub poll_interval: Duration,
    /// Time between SIGTERM and SIGKILL once termination was requested.
    pub termination_grace: Duration,
    pub console: ConsoleSettings,
}

/// Mutable bookkeeping of the unit being executed.
#[derive(Debug, Default)]
pub struct UnitState {
    internal_error: bool,
    skip_status_update: bool,
    errors: Vec<String>,
}

impl UnitState {
    /// Records an internal error, which forces the final status to `error`.
    fn fail(&mut self, message: String) {
        error!("{message}");
        self.internal_error = true;
        self.errors.push(message);
    }

    /// Records an error for the debug logs without changing the outcome.
    fn record(&mut self, message: String) {
        warn!("{message}");
        self.errors.push(message);
    }

    pub fn has_internal_error(&self) -> bool {
        self.internal_error
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }
}

/// Whichever of process exit and terminating signal came first. Decided once per unit.
#[derive(Debug)]
enum RaceOutcome {
    NotLaunched,
    Exited(ProcessExit),
    Terminated {
        signal: TerminatingSignal,
        exit: Option<ProcessExit>,
    },
}

/// Runs units of work, racing the unit script against its terminating signal.
pub struct ExecutionSupervisor<A> {
    api: Arc<A>,
    sink: Arc<dyn ConsoleSink>,
    codes: SystemCodes,
    settings: SupervisorSettings,
    markers: HandoffMarkers,
}

impl<A> ExecutionSupervisor<A>
where
    A: JobApi,
{
    pub fn new(
        api: Arc<A>,
        sink: Arc<dyn ConsoleSink>,
        codes: SystemCodes,
        settings: SupervisorSettings,
        markers: HandoffMarkers,
    ) -> Self {
        Self {
            api,
            sink,
            codes,
            settings,
            markers,
        }
    }

    /// Runs one unit to completion. Only invalid requests are errors, every other problem ends
    /// up in the status of the returned result.
    pub async fn execute(
        &self,
        request: &ExecutionRequest,
    ) -> Result<ExecutionResult, SupervisorError> {
        request.validate()?;
        let unit_id = request.unit_id();
        info!(%unit_id, script = %request.script_path().display(), "Executing unit");

        let console = ConsoleBuffer::new(
            self.sink.clone(),
            request.console().clone(),
            self.settings.console.clone(),
        );
        let mut state = UnitState::default();

        if let Err(err) = self.markers.write_owner(ExecutionOwner::Agent).await {
            warn!(%unit_id, "Failed to write owner marker: {err}");
        }

        let processing = StatusUpdate::new(self.codes.code(StatusCode::Processing)).started_now();
        if let Err(err) = self.api.put_unit_status(unit_id, &processing).await {
            state.fail(format!(
                "Failed to update status of unit {unit_id} to processing: {err}"
            ));
        }

        let outcome = if state.internal_error {
            RaceOutcome::NotLaunched
        } else {
            self.run(request, &console, &mut state).await
        };

        let (status, exit) = match &outcome {
            RaceOutcome::Terminated { signal, exit } => {
                state.skip_status_update = true;
                (signal.status_code(), exit.as_ref())
            }
            RaceOutcome::Exited(exit) if state.internal_error => (StatusCode::Error, Some(exit)),
            RaceOutcome::Exited(exit) => (status_from_exit(exit.exit_code, exit.signal), Some(exit)),
            RaceOutcome::NotLaunched => (StatusCode::Error, None),
        };
        // stderr ends up in the debug logs whatever the outcome
        if let Some(exit) = exit {
            state.errors.extend(exit.stderr.iter().cloned());
        }
        let result = ExecutionResult::new(exit, status, state.skip_status_update);
        info!(%unit_id, status = %result.status(), exit_code = ?result.exit_code(), signal = ?result.signal(), "Unit finished");

        if state.skip_status_update {
            debug!(%unit_id, "Status owned by the controller, not updating it");
        } else {
            let update = StatusUpdate::new(self.codes.code(status)).ended_now();
            if let Err(err) = self.api.put_unit_status(unit_id, &update).await {
                state.record(format!(
                    "Failed to update status of unit {unit_id} to {status}: {err}"
                ));
            }
        }

        self.hand_back(unit_id, status).await;
        self.publish_errors(&console, state.errors());

        console.flush();
        if tokio::time::timeout(self.settings.console.drain_timeout, console.drained())
            .await
            .is_err()
        {
            warn!(%unit_id, pending = console.pending_api_calls(), "Console entries still in flight");
        }

        Ok(result)
    }

    async fn run(
        &self,
        request: &ExecutionRequest,
        console: &ConsoleBuffer,
        state: &mut UnitState,
    ) -> RaceOutcome {
        let unit_id = request.unit_id();
        let Some(source) = request.signal().cloned() else {
            state.fail(format!("Unit {unit_id} has no status signal"));
            return RaceOutcome::NotLaunched;
        };

        if let Some(signal) = read_signal(source.as_ref()).await {
            info!(%unit_id, ?signal, "Unit terminating before launch, skipping the script");
            terminating_notice(console, signal);
            return RaceOutcome::Terminated { signal, exit: None };
        }

        let interval_ms = u64::try_from(self.settings.poll_interval.as_millis()).unwrap_or(u64::MAX);
        let mut watcher =
            match StatusWatcher::try_new(source, interval_ms, TerminatingSignal::TOKENS) {
                Ok(watcher) => watcher,
                Err(err) => {
                    state.fail(format!("Invalid status watcher for unit {unit_id}: {err}"));
                    return RaceOutcome::NotLaunched;
                }
            };

        let runner = match ProcessRunner::for_script(
            &self.settings.exec_bin,
            request.script_path(),
            request.env_path(),
        )
        .start()
        {
            Ok(runner) => runner,
            Err(err) => {
                state.fail(format!("Failed to launch script of unit {unit_id}: {err}"));
                return RaceOutcome::NotLaunched;
            }
        };
        let terminator = runner.terminator();
        debug!(%unit_id, pid = ?terminator.map(|t| t.pid()), "Script started");

        let kill_hook = request.kill_script().map(|script| {
            KillHook::new(&self.settings.exec_bin, script)
                .with_container(request.container().map(str::to_string))
        });

        let mut matches = watcher.start();
        let wait = runner.wait();
        tokio::pin!(wait);
        let kill_deadline = tokio::time::sleep(Duration::ZERO);
        tokio::pin!(kill_deadline);
        let mut kill_armed = false;
        let mut terminating: Option<TerminatingSignal> = None;

        let exit = loop {
            tokio::select! {
                biased;
                exit = &mut wait => break exit,
                Some(value) = matches.recv(), if terminating.is_none() => {
                    let Some(signal) = TerminatingSignal::from_token(&value) else {
                        continue;
                    };
                    info!(%unit_id, status = %value, "Terminating signal received");
                    terminating = Some(signal);
                    watcher.stop();
                    terminating_notice(console, signal);

                    match terminator {
                        Some(terminator) => {
                            terminator.request_termination(kill_hook.as_ref()).await;
                            kill_deadline
                                .as_mut()
                                .reset(Instant::now() + self.settings.termination_grace);
                            kill_armed = true;
                        }
                        None => debug!(%unit_id, "Process already gone, nothing to terminate"),
                    }
                }
                () = &mut kill_deadline, if kill_armed => {
                    kill_armed = false;
                    if let Some(terminator) = terminator {
                        warn!(%unit_id, pid = terminator.pid(), "Process still running after the grace period, killing it");
                        terminator.force_kill();
                    }
                }
            }
        };
        watcher.stop();

        let exit = match exit {
            Ok(exit) => Some(exit),
            Err(err) => {
                state.fail(format!("Failed waiting for script of unit {unit_id}: {err}"));
                None
            }
        };

        match (terminating, exit) {
            (Some(signal), exit) => RaceOutcome::Terminated { signal, exit },
            (None, Some(exit)) => RaceOutcome::Exited(exit),
            (None, None) => RaceOutcome::NotLaunched,
        }
    }

    async fn hand_back(&self, unit_id: &str, status: StatusCode) {
        if let Err(err) = self.markers.write_owner(ExecutionOwner::Controller).await {
            warn!(%unit_id, "Failed to write owner marker: {err}");
        }
        if let Err(err) = self.markers.write_status(status).await {
            warn!(%unit_id, "Failed to write status marker: {err}");
        }
    }

    fn publish_errors(&self, console: &ConsoleBuffer, errors: &[String]) {
        if errors.is_empty() {
            return;
        }
        console.open_group(DEBUG_LOGS_GROUP);
        console.open_command(ERRORS_COMMAND);
        for message in errors {
            console.publish_message(message);
        }
        console.close_command(false);
        console.close_group(false);
    }
}

async fn read_signal(source: &dyn StatusSource) -> Option<TerminatingSignal> {
    match source.read().await {
        Ok(value) => TerminatingSignal::from_token(&value),
        Err(err) => {
            debug!(source = %source.id(), %err, "Status signal not readable");
            None
        }
    }
}

fn terminating_notice(console: &ConsoleBuffer, signal: TerminatingSignal) {
    console.open_group(&format!(
        "Terminating the unit because the status was: {}",
        signal.status_code()
    ));
    console.close_group(true);
}
