// disable miri tests as Command is not supported yet
#![cfg(all(unix, not(miri)))]

use async_trait::async_trait;
use build_agent::console::{ConsoleBatch, ConsoleSettings, ConsoleSink};
use build_agent::group::preparer::{ENV_FILE, SCRIPT_FILE};
use build_agent::group::{GroupAssignment, GroupExecutor, ScriptLayout};
use build_agent::http::{ApiError, JobApi, StatusUpdate, SubUnit};
use build_agent::status::{StatusCode, SystemCode, SystemCodes};
use build_agent::supervisor::{
    ExecutionOwner, ExecutionSupervisor, HandoffMarkers, SupervisorSettings,
};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::tempdir;

const CODES: [(&str, i64); 8] = [
    ("queued", 20),
    ("processing", 10),
    ("success", 30),
    ("failure", 50),
    ("error", 60),
    ("cancelling", 70),
    ("timingOut", 80),
    ("skipped", 90),
];

/// In-memory job service: hands out a fixed list of steps, one unit each, and records every
/// update and console batch it receives.
#[derive(Default)]
struct FakeJobService {
    steps: Mutex<VecDeque<String>>,
    unit_updates: Mutex<Vec<(String, i64)>>,
    step_updates: Mutex<Vec<(String, i64)>>,
    node_updates: Mutex<Vec<(String, i64)>>,
    consoles: Mutex<Vec<ConsoleBatch>>,
}

impl FakeJobService {
    fn with_steps(steps: &[&str]) -> Self {
        Self {
            steps: Mutex::new(steps.iter().map(|s| s.to_string()).collect()),
            ..Default::default()
        }
    }

    fn unit_codes(&self, unit_id: &str) -> Vec<i64> {
        self.unit_updates
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == unit_id)
            .map(|(_, code)| *code)
            .collect()
    }

    fn console_messages(&self) -> Vec<String> {
        self.consoles
            .lock()
            .unwrap()
            .iter()
            .flat_map(|b| b.entries.iter().map(|e| e.message.clone()))
            .collect()
    }
}

#[async_trait]
impl JobApi for FakeJobService {
    async fn get_system_codes(&self) -> Result<Vec<SystemCode>, ApiError> {
        Ok(CODES
            .iter()
            .map(|(name, code)| SystemCode {
                name: name.to_string(),
                code: *code,
            })
            .collect())
    }

    async fn get_next_step(&self, _: &str, _: &str) -> Result<Option<String>, ApiError> {
        Ok(self.steps.lock().unwrap().pop_front())
    }

    async fn get_sub_units(&self, step_id: &str) -> Result<Vec<SubUnit>, ApiError> {
        Ok(vec![SubUnit {
            id: format!("{step_id}-unit"),
            step_id: step_id.to_string(),
            pipeline_id: "1".to_string(),
        }])
    }

    async fn put_unit_status(&self, unit_id: &str, update: &StatusUpdate) -> Result<(), ApiError> {
        self.unit_updates
            .lock()
            .unwrap()
            .push((unit_id.to_string(), update.status_code));
        Ok(())
    }

    async fn put_step_status(&self, step_id: &str, update: &StatusUpdate) -> Result<(), ApiError> {
        self.step_updates
            .lock()
            .unwrap()
            .push((step_id.to_string(), update.status_code));
        Ok(())
    }

    async fn put_cluster_node(
        &self,
        node_id: &str,
        update: &StatusUpdate,
    ) -> Result<(), ApiError> {
        self.node_updates
            .lock()
            .unwrap()
            .push((node_id.to_string(), update.status_code));
        Ok(())
    }
}

#[async_trait]
impl ConsoleSink for FakeJobService {
    async fn post_entries(&self, batch: &ConsoleBatch) -> Result<(), ApiError> {
        self.consoles.lock().unwrap().push(batch.clone());
        Ok(())
    }
}

fn write_script(layout: &ScriptLayout, step_id: &str, content: &str) {
    let dir = layout.unit_dir(step_id, &format!("{step_id}-unit"));
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join(SCRIPT_FILE), content).unwrap();
    std::fs::write(dir.join(ENV_FILE), "").unwrap();
}

fn executor(
    api: Arc<FakeJobService>,
    base: &Path,
    layout: ScriptLayout,
) -> GroupExecutor<FakeJobService, ScriptLayout> {
    let codes = SystemCodes::try_from_remote(
        CODES
            .iter()
            .map(|(name, code)| SystemCode {
                name: name.to_string(),
                code: *code,
            })
            .collect(),
    )
    .unwrap();
    let settings = SupervisorSettings {
        exec_bin: PathBuf::from("sh"),
        poll_interval: Duration::from_millis(10),
        termination_grace: Duration::from_secs(2),
        console: ConsoleSettings {
            batch_size: 20,
            flush_interval: Duration::from_millis(50),
            drain_timeout: Duration::from_secs(5),
        },
    };
    let supervisor = ExecutionSupervisor::new(
        api.clone(),
        api.clone(),
        codes.clone(),
        settings,
        HandoffMarkers::new(base.join("markers")),
    );
    GroupExecutor::new(api, supervisor, layout, codes, "node-1", base.join("pipelines"))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn runs_every_step_of_the_group() {
    let base = tempdir().unwrap();
    let layout = ScriptLayout::new(base.path().join("steps"), base.path().join("step.status"));
    write_script(&layout, "A", "echo building\nexit 0");
    write_script(&layout, "B", "echo broken >&2\nexit 3");
    std::fs::create_dir_all(base.path().join("pipelines/leftover")).unwrap();

    let api = Arc::new(FakeJobService::with_steps(&["A", "B"]));
    let summary = executor(api.clone(), base.path(), layout)
        .execute(&GroupAssignment {
            run_id: "7".to_string(),
            affinity_group: "build".to_string(),
        })
        .await
        .unwrap();

    assert_eq!(summary.steps, vec!["A".to_string(), "B".to_string()]);
    assert_eq!(summary.status_of("A-unit"), Some(StatusCode::Success));
    assert_eq!(summary.status_of("B-unit"), Some(StatusCode::Failure));

    // queued, processing, final
    assert_eq!(api.unit_codes("A-unit"), vec![20, 10, 30]);
    assert_eq!(api.unit_codes("B-unit"), vec![20, 10, 50]);
    assert_eq!(
        *api.step_updates.lock().unwrap(),
        vec![("A".to_string(), 20), ("B".to_string(), 20)]
    );
    assert_eq!(
        *api.node_updates.lock().unwrap(),
        vec![("node-1".to_string(), 10)]
    );

    // stderr of the failed unit ends up in its debug logs, stdout stays local
    let messages = api.console_messages();
    assert!(messages.contains(&"broken".to_string()));
    assert!(!messages.contains(&"building".to_string()));

    let markers = HandoffMarkers::new(base.path().join("markers"));
    assert_eq!(markers.read_owner().await.unwrap(), ExecutionOwner::Controller);
    assert_eq!(
        markers.read_status().await.unwrap(),
        Some(StatusCode::Failure)
    );

    let pipelines = std::fs::read_dir(base.path().join("pipelines")).unwrap();
    assert_eq!(pipelines.count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn timed_out_step_is_terminated_without_final_status() {
    let base = tempdir().unwrap();
    let roster = base.path().join("step.status");
    let layout = ScriptLayout::new(base.path().join("steps"), &roster);
    write_script(&layout, "T", "sleep 30");

    let api = Arc::new(FakeJobService::with_steps(&["T"]));
    let executor = executor(api.clone(), base.path(), layout);

    let controller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        tokio::fs::write(&roster, r#"{"cancelling": [], "timingOut": ["T"]}"#)
            .await
            .unwrap();
    });

    let summary = tokio::time::timeout(
        Duration::from_secs(20),
        executor.execute(&GroupAssignment {
            run_id: "7".to_string(),
            affinity_group: "build".to_string(),
        }),
    )
    .await
    .unwrap()
    .unwrap();
    controller.await.unwrap();

    assert_eq!(summary.status_of("T-unit"), Some(StatusCode::TimingOut));
    // the controller owns the final status of a terminated unit
    assert_eq!(api.unit_codes("T-unit"), vec![20, 10]);
    assert!(api
        .console_messages()
        .iter()
        .any(|m| m == "Terminating the unit because the status was: timingOut"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn second_step_times_out_after_the_first_succeeds() {
    let base = tempdir().unwrap();
    let roster = base.path().join("step.status");
    let started = base.path().join("b-started");
    let layout = ScriptLayout::new(base.path().join("steps"), &roster);
    write_script(&layout, "A", "exit 0");
    write_script(
        &layout,
        "B",
        &format!("touch {}\nsleep 30", started.display()),
    );

    let api = Arc::new(FakeJobService::with_steps(&["A", "B"]));
    let executor = executor(api.clone(), base.path(), layout);

    let controller = tokio::spawn(async move {
        while !started.exists() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        tokio::fs::write(&roster, r#"{"timingOut": ["B"]}"#)
            .await
            .unwrap();
    });

    let summary = tokio::time::timeout(
        Duration::from_secs(20),
        executor.execute(&GroupAssignment {
            run_id: "7".to_string(),
            affinity_group: "build".to_string(),
        }),
    )
    .await
    .unwrap()
    .unwrap();
    controller.await.unwrap();

    assert_eq!(summary.steps, vec!["A".to_string(), "B".to_string()]);
    assert_eq!(summary.status_of("A-unit"), Some(StatusCode::Success));
    assert_eq!(summary.status_of("B-unit"), Some(StatusCode::TimingOut));
    assert_eq!(api.unit_codes("A-unit"), vec![20, 10, 30]);
    assert_eq!(api.unit_codes("B-unit"), vec![20, 10]);
}
