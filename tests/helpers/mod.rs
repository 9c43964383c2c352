//! Test utilities for ci-pipeline scenarios

#![allow(dead_code)]

use async_trait::async_trait;
use ci_pipeline::core::config::{EngineSettings, PipelineConfig};
use ci_pipeline::core::pipeline::PipelineDefinition;
use ci_pipeline::core::report::{InstanceReport, RunReport};
use ci_pipeline::core::state::RunResult;
use ci_pipeline::core::step::StepAction;
use ci_pipeline::core::trigger::{evaluate_trigger, TriggerEvent};
use ci_pipeline::execution::{CancellationToken, ExecutionEngine, RunError};
use ci_pipeline::runner::{actions, Invocation, ToolError, ToolOutput, ToolRunner};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// One call the mock received
#[derive(Debug, Clone)]
pub struct Call {
    pub run_id: String,
    pub job: String,
    pub step_id: String,
    pub matrix: BTreeMap<String, String>,
    pub env: BTreeMap<String, String>,
    pub working_dir: PathBuf,
}

#[derive(Default)]
struct MockState {
    failures: Mutex<Vec<(String, Option<String>, i32)>>,
    unavailable: Mutex<HashSet<String>>,
    outputs: Mutex<HashMap<String, BTreeMap<String, String>>>,
    files: Mutex<HashMap<String, Vec<(String, String)>>>,
    delays: Mutex<HashMap<String, Duration>>,
    first_delays: Mutex<HashMap<String, Duration>>,
    default_delay: Mutex<Option<Duration>>,
    calls: Mutex<Vec<Call>>,
    running: AtomicUsize,
    peak: AtomicUsize,
    completed: AtomicUsize,
}

/// Scripted tool runner.
///
/// Shell steps succeed unless scripted otherwise; `uses:` steps go to the
/// built-in actions so artifacts really move between stages. Clones share
/// state, so a test can keep one and hand another to the engine.
#[derive(Clone, Default)]
pub struct MockRunner {
    state: Arc<MockState>,
}

struct Running<'a>(&'a MockState);

impl<'a> Running<'a> {
    fn enter(state: &'a MockState) -> Self {
        let now = state.running.fetch_add(1, Ordering::SeqCst) + 1;
        state.peak.fetch_max(now, Ordering::SeqCst);
        Running(state)
    }
}

impl Drop for Running<'_> {
    fn drop(&mut self) {
        self.0.running.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Step exits with `code` in every instance
    pub fn fail_step(self, step_id: &str, code: i32) -> Self {
        self.state
            .failures
            .lock()
            .unwrap()
            .push((step_id.to_string(), None, code));
        self
    }

    /// Step exits with `code` only where some matrix axis has `value`
    pub fn fail_step_where(self, step_id: &str, value: &str, code: i32) -> Self {
        self.state
            .failures
            .lock()
            .unwrap()
            .push((step_id.to_string(), Some(value.to_string()), code));
        self
    }

    /// Step cannot be invoked at all
    pub fn unavailable(self, step_id: &str) -> Self {
        self.state.unavailable.lock().unwrap().insert(step_id.to_string());
        self
    }

    pub fn with_output(self, step_id: &str, key: &str, value: &str) -> Self {
        self.state
            .outputs
            .lock()
            .unwrap()
            .entry(step_id.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
        self
    }

    /// Step writes `content` to `path` inside the instance sandbox
    pub fn writes(self, step_id: &str, path: &str, content: &str) -> Self {
        self.state
            .files
            .lock()
            .unwrap()
            .entry(step_id.to_string())
            .or_default()
            .push((path.to_string(), content.to_string()));
        self
    }

    pub fn with_delay(self, step_id: &str, delay: Duration) -> Self {
        self.state
            .delays
            .lock()
            .unwrap()
            .insert(step_id.to_string(), delay);
        self
    }

    /// Delay only the first call of a step
    pub fn with_first_delay(self, step_id: &str, delay: Duration) -> Self {
        self.state
            .first_delays
            .lock()
            .unwrap()
            .insert(step_id.to_string(), delay);
        self
    }

    /// Delay applied to every step without its own
    pub fn with_default_delay(self, delay: Duration) -> Self {
        *self.state.default_delay.lock().unwrap() = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, step_id: &str) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.step_id == step_id)
            .collect()
    }

    /// Highest number of steps seen running at once
    pub fn peak_concurrency(&self) -> usize {
        self.state.peak.load(Ordering::SeqCst)
    }

    pub fn running(&self) -> usize {
        self.state.running.load(Ordering::SeqCst)
    }

    /// Steps that ran to the end without being dropped
    pub fn completed(&self) -> usize {
        self.state.completed.load(Ordering::SeqCst)
    }

    fn failure_for(&self, call: &Call) -> Option<i32> {
        self.state
            .failures
            .lock()
            .unwrap()
            .iter()
            .find(|(step, value, _)| {
                *step == call.step_id
                    && value
                        .as_ref()
                        .map_or(true, |v| call.matrix.values().any(|m| m == v))
            })
            .map(|(_, _, code)| *code)
    }
}

#[async_trait]
impl ToolRunner for MockRunner {
    async fn run(&self, invocation: &Invocation) -> Result<ToolOutput, ToolError> {
        let call = Call {
            run_id: invocation.env.get("CI_RUN_ID").cloned().unwrap_or_default(),
            job: invocation.env.get("CI_JOB").cloned().unwrap_or_default(),
            step_id: invocation.step_id.clone(),
            matrix: invocation
                .env
                .iter()
                .filter_map(|(k, v)| {
                    k.strip_prefix("CI_MATRIX_")
                        .map(|axis| (axis.to_lowercase(), v.clone()))
                })
                .collect(),
            env: invocation.env.clone(),
            working_dir: invocation.working_dir.clone(),
        };
        self.state.calls.lock().unwrap().push(call.clone());

        let _running = Running::enter(&self.state);

        let first = self.state.first_delays.lock().unwrap().remove(&call.step_id);
        let delay = first
            .or_else(|| self.state.delays.lock().unwrap().get(&call.step_id).copied())
            .or(*self.state.default_delay.lock().unwrap());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.state.unavailable.lock().unwrap().contains(&call.step_id) {
            return Err(ToolError::NotFound(format!("{}: tool missing", call.step_id)));
        }

        if let StepAction::Action(name) = &invocation.action {
            let output = actions::run(name, invocation).await;
            self.state.completed.fetch_add(1, Ordering::SeqCst);
            return output;
        }

        if let Some(code) = self.failure_for(&call) {
            self.state.completed.fetch_add(1, Ordering::SeqCst);
            return Ok(ToolOutput::failure(code, format!("{} failed", call.step_id)));
        }

        let files = self
            .state
            .files
            .lock()
            .unwrap()
            .get(&call.step_id)
            .cloned()
            .unwrap_or_default();
        for (path, content) in files {
            let target = invocation.working_dir.join(path);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).map_err(ToolError::Spawn)?;
            }
            std::fs::write(target, content).map_err(ToolError::Spawn)?;
        }

        let mut output = ToolOutput::success().with_stdout(format!("ran {}", call.step_id));
        if let Some(outputs) = self.state.outputs.lock().unwrap().get(&call.step_id) {
            output.outputs.extend(outputs.clone());
        }
        self.state.completed.fetch_add(1, Ordering::SeqCst);
        Ok(output)
    }
}

/// Temporary directories for one test
pub struct Sandbox {
    pub dir: TempDir,
}

impl Sandbox {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("source")).unwrap();
        std::fs::write(dir.path().join("source").join("README.md"), "# docs\n").unwrap();
        Self { dir }
    }

    pub fn workspace_root(&self) -> PathBuf {
        self.dir.path().join("runs")
    }

    pub fn publish_dir(&self) -> PathBuf {
        self.dir.path().join("published")
    }

    pub fn settings(&self) -> EngineSettings {
        EngineSettings::new()
            .with_workspace_root(self.workspace_root())
            .with_source_dir(self.dir.path().join("source"))
            .with_publish_dir(self.publish_dir())
    }
}

pub fn load(yaml: &str) -> PipelineDefinition {
    PipelineConfig::from_yaml(yaml)
        .expect("pipeline should parse")
        .to_definition()
        .expect("pipeline should convert")
}

pub fn engine(runner: MockRunner, settings: EngineSettings) -> Arc<ExecutionEngine<MockRunner>> {
    Arc::new(ExecutionEngine::new(runner, settings))
}

pub fn push_to_main() -> TriggerEvent {
    TriggerEvent::push("main", "octocat")
}

/// Run `yaml` once for a push to main, without a concurrency group
pub async fn run_pipeline_with_mock(
    yaml: &str,
    runner: MockRunner,
    sandbox: &Sandbox,
) -> Result<RunReport, RunError> {
    let definition = load(yaml);
    let spec = evaluate_trigger(&definition, &push_to_main()).expect("push to main should trigger");
    engine(runner, sandbox.settings())
        .execute(&definition, &spec, CancellationToken::new())
        .await
}

/// Poll `condition` until it holds, panicking after five seconds
pub async fn wait_until<F: Fn() -> bool>(what: &str, condition: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {}", what);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// Assertion helpers

pub fn assert_run_result(report: &RunReport, expected: RunResult) {
    assert_eq!(
        report.result, expected,
        "Run should be {} but was {}",
        expected, report.result
    );
}

pub fn instance<'a>(report: &'a RunReport, job: &str, matrix_value: Option<&str>) -> &'a InstanceReport {
    report
        .instances()
        .find(|i| {
            i.job_id == job
                && matrix_value.map_or(true, |v| i.coordinate.iter().any(|(_, value)| value == v))
        })
        .unwrap_or_else(|| panic!("No instance of '{}' matching {:?}", job, matrix_value))
}

pub fn assert_step_ids(instance: &InstanceReport, expected: &[&str]) {
    let actual: Vec<&str> = instance.steps.iter().map(|s| s.step_id.as_str()).collect();
    assert_eq!(actual, expected, "Steps of {} ran out of expectation", instance.job_id);
}

pub fn assert_stage_not_run(report: &RunReport, stage: &str) {
    let stage_report = report
        .stage(stage)
        .unwrap_or_else(|| panic!("Stage '{}' missing from report", stage));
    assert!(
        stage_report.result.is_none(),
        "Stage '{}' should not have run, but ended {:?}",
        stage,
        stage_report.result
    );
    assert_eq!(stage_report.instances_started(), 0);
}
