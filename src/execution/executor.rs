//! Step executor - runs the steps of one job instance in order

use crate::{
    core::{
        context::{InstanceContext, RunContext},
        job::JobInstance,
        pipeline::DEFAULT_CANCEL_GRACE_SECS,
        pipeline::DEFAULT_STEP_TIMEOUT_SECS,
        report::{FailedStep, InstanceReport, StepReport},
        secret::Secrets,
        state::{RunResult, StepFailure},
        step::{render_map, Step},
    },
    execution::{
        cancel::CancellationToken,
        events::{EventBus, ExecutionEvent},
        workspace::{InstanceWorkspace, RunWorkspace},
    },
    runner::{Invocation, ToolError, ToolOutput, ToolRunner},
};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Lines of captured output kept in each step report
pub const LOG_TAIL_LINES: usize = 20;

/// How a single step invocation ended
#[derive(Debug)]
pub enum StepOutcome {
    /// The tool ran to completion, successfully or not
    Completed(ToolOutput),
    /// The tool could not be invoked
    Unavailable(ToolError),
    TimedOut(Duration),
    Cancelled,
}

/// Executes the steps of job instances
pub struct StepExecutor<R> {
    runner: Arc<R>,
    step_timeout: Duration,
    cancel_grace: Duration,
    source_dir: Option<PathBuf>,
    publish_dir: PathBuf,
    events: EventBus,
}

impl<R: ToolRunner> StepExecutor<R> {
    pub fn new(runner: Arc<R>, events: EventBus) -> Self {
        Self {
            runner,
            step_timeout: Duration::from_secs(DEFAULT_STEP_TIMEOUT_SECS),
            cancel_grace: Duration::from_secs(DEFAULT_CANCEL_GRACE_SECS),
            source_dir: None,
            publish_dir: std::env::temp_dir().join("ci-pipeline").join("published"),
            events,
        }
    }

    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    pub fn with_cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace = grace;
        self
    }

    pub fn with_source_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.source_dir = dir;
        self
    }

    pub fn with_publish_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.publish_dir = dir.into();
        self
    }

    /// Run every step of `instance`, stopping at the first one that does not
    /// succeed. Always returns exactly one terminal report.
    pub async fn execute(
        &self,
        instance: &JobInstance,
        run: &RunContext,
        workspace: &RunWorkspace,
        cancel: &CancellationToken,
    ) -> InstanceReport {
        let label = instance.to_string();

        if cancel.is_cancelled() {
            info!(run_id = %run.run_id, job = %label, "Cancelled before start");
            return InstanceReport::not_started(&instance.job_id, instance.index, instance.coordinate.clone());
        }

        let started_at = Utc::now();
        let sandbox = match workspace.prepare(instance).await {
            Ok(sandbox) => sandbox,
            Err(e) => {
                error!(run_id = %run.run_id, job = %label, "Could not prepare workspace: {}", e);
                let failure = StepFailure::Infrastructure {
                    reason: format!("could not prepare workspace: {}", e),
                };
                return InstanceReport {
                    result: RunResult::Failed,
                    failed_step: instance.steps.first().map(|step| FailedStep {
                        index: 0,
                        step_id: step.id.clone(),
                        failure,
                    }),
                    started_at: Some(started_at),
                    ..InstanceReport::not_started(&instance.job_id, instance.index, instance.coordinate.clone())
                };
            }
        };

        let mut ctx = InstanceContext::new(run, instance);
        let mut steps = Vec::with_capacity(instance.steps.len());
        let mut result = RunResult::Succeeded;
        let mut failed_step = None;

        for (index, step) in instance.steps.iter().enumerate() {
            if cancel.is_cancelled() {
                info!(run_id = %run.run_id, job = %label, "Cancelled before step {}", step.id);
                result = RunResult::Cancelled;
                break;
            }

            ctx.current_step_id = Some(step.id.clone());
            let variables = ctx.get_rendering_variables();
            let invocation = self.invocation(step, instance, run, &sandbox, workspace, &variables);

            self.events.emit(ExecutionEvent::StepStarted {
                run_id: run.run_id,
                instance: label.clone(),
                step_id: step.id.clone(),
                name: step.name.clone(),
            });
            info!(run_id = %run.run_id, job = %label, step = %step.id, "Running step: {}", step.name);
            debug!(step = %step.id, "Action: {}", invocation.secrets_redacted_action());

            let step_started = Utc::now();
            let limit = step
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(self.step_timeout);
            let outcome = self.run_step(&invocation, limit, cancel).await;
            // Later steps see raw values, reports only masked ones
            let raw_outputs = match &outcome {
                StepOutcome::Completed(output) if output.succeeded() => output.outputs.clone(),
                _ => BTreeMap::new(),
            };
            let report = step_report(index, step, outcome, &run.secrets, step_started);

            self.events.emit(ExecutionEvent::StepFinished {
                run_id: run.run_id,
                instance: label.clone(),
                step_id: step.id.clone(),
                result: report.result,
                failure: report.failure.clone(),
            });

            let step_result = report.result;
            let failure = report.failure.clone();
            if step_result.is_success() {
                ctx.set_step_outputs(&step.id, raw_outputs);
            }
            steps.push(report);

            if !step_result.is_success() {
                match &failure {
                    Some(failure) if failure.is_infrastructure() => {
                        error!(run_id = %run.run_id, job = %label, step = %step.id, "Step could not run: {}", failure)
                    }
                    Some(failure) => {
                        warn!(run_id = %run.run_id, job = %label, step = %step.id, "Step failed: {}", failure)
                    }
                    None => info!(run_id = %run.run_id, job = %label, step = %step.id, "Step cancelled"),
                }
                result = step_result;
                failed_step = failure.map(|failure| FailedStep {
                    index,
                    step_id: step.id.clone(),
                    failure,
                });
                break;
            }
        }

        let outputs = if result.is_success() {
            ctx.current_step_id = None;
            run.secrets
                .redact_map(&render_map(&instance.outputs, &ctx.get_rendering_variables()))
        } else {
            BTreeMap::new()
        };

        InstanceReport {
            job_id: instance.job_id.clone(),
            index: instance.index,
            coordinate: instance.coordinate.clone(),
            result,
            failed_step,
            steps,
            outputs,
            started_at: Some(started_at),
            finished_at: Utc::now(),
        }
    }

    /// Run one invocation under its timeout, racing it against cancellation.
    ///
    /// On cancellation the step gets the grace period to finish; after that
    /// its future is dropped, which kills a spawned process.
    pub async fn run_step(
        &self,
        invocation: &Invocation,
        limit: Duration,
        cancel: &CancellationToken,
    ) -> StepOutcome {
        let run = tokio::time::timeout(limit, self.runner.run(invocation));
        tokio::pin!(run);

        let finished = tokio::select! {
            biased;
            finished = &mut run => finished,
            _ = cancel.cancelled() => {
                warn!(
                    step = %invocation.step_id,
                    "Cancellation requested, allowing {:?} to finish",
                    self.cancel_grace
                );
                if tokio::time::timeout(self.cancel_grace, &mut run).await.is_err() {
                    warn!(step = %invocation.step_id, "Grace period elapsed, terminating step");
                }
                return StepOutcome::Cancelled;
            }
        };

        // A cancellation requested before completion wins the race
        let completed_at = Instant::now();
        if cancel.requested_at().is_some_and(|at| at < completed_at) {
            return StepOutcome::Cancelled;
        }

        match finished {
            Ok(Ok(output)) => StepOutcome::Completed(output),
            Ok(Err(e)) => StepOutcome::Unavailable(e),
            Err(_) => StepOutcome::TimedOut(limit),
        }
    }

    fn invocation(
        &self,
        step: &Step,
        instance: &JobInstance,
        run: &RunContext,
        sandbox: &InstanceWorkspace,
        workspace: &RunWorkspace,
        variables: &HashMap<String, String>,
    ) -> Invocation {
        let mut env = BTreeMap::new();
        env.insert("CI".to_string(), "true".to_string());
        env.insert("CI_RUN_ID".to_string(), run.run_id.to_string());
        env.insert("CI_REPOSITORY".to_string(), run.repository.to_string());
        env.insert("CI_BRANCH".to_string(), run.spec.event.branch.clone());
        env.insert("CI_EVENT".to_string(), run.spec.event.kind.to_string());
        env.insert("CI_ACTOR".to_string(), run.spec.event.actor.clone());
        env.insert("CI_JOB".to_string(), instance.job_id.clone());
        env.insert("CI_WORKSPACE".to_string(), sandbox.dir.display().to_string());
        for (axis, value) in instance.coordinate.iter() {
            env.insert(format!("CI_MATRIX_{}", env_name(axis)), value.to_string());
        }

        // Later levels override earlier ones
        env.extend(render_map(&run.env, variables));
        env.extend(render_map(&instance.env, variables));
        env.extend(step.render_env(variables));

        Invocation {
            step_id: step.id.clone(),
            action: step.render_action(variables),
            inputs: step.render_inputs(variables),
            env,
            secrets: run.secrets.clone(),
            working_dir: sandbox.dir.clone(),
            state_dir: sandbox.state_dir.clone(),
            artifacts_dir: workspace.artifacts_dir(),
            source_dir: self.source_dir.clone(),
            publish_dir: self.publish_dir.clone(),
            repository: run.repository.clone(),
        }
    }
}

fn step_report(
    index: usize,
    step: &Step,
    outcome: StepOutcome,
    secrets: &Secrets,
    started_at: DateTime<Utc>,
) -> StepReport {
    let tail = |output: &ToolOutput| -> Vec<String> {
        output
            .tail(LOG_TAIL_LINES)
            .iter()
            .map(|line| secrets.redact(line))
            .collect()
    };

    let (result, failure, outputs, log_tail) = match outcome {
        StepOutcome::Completed(output) if output.succeeded() => {
            let log_tail = tail(&output);
            (RunResult::Succeeded, None, secrets.redact_map(&output.outputs), log_tail)
        }
        StepOutcome::Completed(output) => (
            RunResult::Failed,
            Some(StepFailure::ExitStatus {
                code: output.exit_code,
            }),
            BTreeMap::new(),
            tail(&output),
        ),
        StepOutcome::Unavailable(e) => (
            RunResult::Failed,
            Some(StepFailure::Infrastructure {
                reason: secrets.redact(&e.to_string()),
            }),
            BTreeMap::new(),
            Vec::new(),
        ),
        StepOutcome::TimedOut(limit) => (
            RunResult::Failed,
            Some(StepFailure::TimedOut {
                secs: limit.as_secs(),
            }),
            BTreeMap::new(),
            Vec::new(),
        ),
        StepOutcome::Cancelled => (RunResult::Cancelled, None, BTreeMap::new(), Vec::new()),
    };

    StepReport {
        index,
        step_id: step.id.clone(),
        name: step.name.clone(),
        result,
        failure,
        outputs,
        log_tail,
        started_at,
        finished_at: Utc::now(),
    }
}

fn env_name(axis: &str) -> String {
    axis.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect()
}
