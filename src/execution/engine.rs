//! Main execution engine - orchestrates an entire pipeline run

use crate::{
    core::{
        config::EngineSettings,
        context::RunContext,
        matrix::MatrixError,
        pipeline::PipelineDefinition,
        report::{DeploymentEnvironment, JobReport, RunReport, StageReport},
        state::RunResult,
        step::render_template,
        trigger::RunSpec,
    },
    execution::{
        cancel::CancellationToken,
        events::{EventBus, ExecutionEvent},
        executor::StepExecutor,
        gate::{merge_outputs, GateError, PipelineGate},
        scheduler::{JobScheduler, SchedulingStrategy},
        workspace::RunWorkspace,
    },
    runner::ToolRunner,
};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

/// A run that could not be carried out at all
#[derive(Debug, Error)]
pub enum RunError {
    /// Matrix expansion failed; no instance was created
    #[error(transparent)]
    Matrix(#[from] MatrixError),

    #[error("failed to prepare run workspace: {0}")]
    Workspace(#[source] std::io::Error),

    #[error(transparent)]
    Gate(#[from] GateError),

    #[error("run task aborted: {0}")]
    Aborted(String),
}

/// Main pipeline execution engine
pub struct ExecutionEngine<R> {
    runner: Arc<R>,
    settings: EngineSettings,
    events: EventBus,
}

impl<R: ToolRunner + 'static> ExecutionEngine<R> {
    pub fn new(runner: R, settings: EngineSettings) -> Self {
        Self {
            runner: Arc::new(runner),
            settings,
            events: EventBus::new(),
        }
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&self, handler: F)
    where
        F: Fn(&ExecutionEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(handler);
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Execute one run of `definition`.
    ///
    /// Every job of every stage is expanded before anything starts. Stages
    /// then run strictly in order; the first stage that does not succeed
    /// decides the run result and later stages are skipped.
    pub async fn execute(
        &self,
        definition: &PipelineDefinition,
        spec: &RunSpec,
        cancel: CancellationToken,
    ) -> Result<RunReport, RunError> {
        let run_id = spec.run_id;
        let started_at = Utc::now();

        let plan = definition.plan(self.settings.max_parallel).map_err(|e| {
            error!(run_id = %run_id, "Matrix expansion failed: {}", e);
            e
        })?;

        let workspace = RunWorkspace::create(
            &self.settings.workspace_root,
            run_id,
            self.settings.keep_workspaces,
        )
        .await
        .map_err(RunError::Workspace)?;

        info!(
            run_id = %run_id,
            "Starting run of '{}' ({} instances in {} stages)",
            definition.name,
            plan.instance_count(),
            plan.stages.len()
        );
        self.events.emit(ExecutionEvent::RunStarted {
            run_id,
            pipeline: definition.name.clone(),
            instances: plan.instance_count(),
        });

        let executor = Arc::new(
            StepExecutor::new(Arc::clone(&self.runner), self.events.clone())
                .with_step_timeout(self.settings.step_timeout.unwrap_or(definition.default_timeout))
                .with_cancel_grace(self.settings.cancel_grace.unwrap_or(definition.cancel_grace))
                .with_source_dir(self.settings.source_dir.clone())
                .with_publish_dir(self.settings.publish_dir.clone()),
        );

        let mut context = RunContext::new(definition, spec.clone(), self.settings.secrets.clone());
        let mut gate = PipelineGate::new(plan.stages.iter().map(|s| s.name.clone()));
        let mut stages = Vec::with_capacity(plan.stages.len());
        let mut environment_url = None;

        for (index, stage) in plan.stages.iter().enumerate() {
            if let Some(blocking) = gate.blocking_stage(index) {
                let reason = format!("stage '{}' did not succeed", blocking);
                info!(run_id = %run_id, stage = %stage.name, "Skipping stage: {}", reason);
                self.events.emit(ExecutionEvent::StageSkipped {
                    run_id,
                    stage: stage.name.clone(),
                    reason,
                });
                stages.push(StageReport {
                    name: stage.name.clone(),
                    result: None,
                    jobs: Vec::new(),
                    environment: None,
                });
                continue;
            }

            // Every earlier stage has a recorded success at this point
            gate.admit(index)?;

            info!(run_id = %run_id, stage = %stage.name, "Starting stage");
            self.events.emit(ExecutionEvent::StageStarted {
                run_id,
                stage: stage.name.clone(),
                instances: stage.instances.len(),
                max_parallel: stage.max_parallel,
            });

            let scheduler = JobScheduler::new(
                Arc::clone(&executor),
                SchedulingStrategy::LimitedParallel(stage.max_parallel),
                self.events.clone(),
            );
            let instances = scheduler
                .run_stage(stage, Arc::new(context.clone()), &workspace, &cancel)
                .await;
            let mut result = RunResult::aggregate(instances.iter().map(|i| i.result));

            if result.is_success() && gate.outputs().is_none() {
                match merge_outputs(&instances).and_then(|outputs| gate.publish(outputs).cloned()) {
                    Ok(outputs) => {
                        info!(run_id = %run_id, "Published {} gate outputs", outputs.len());
                        self.events.emit(ExecutionEvent::OutputsPublished {
                            run_id,
                            outputs: outputs.clone(),
                        });
                        context = context.with_outputs(outputs);
                    }
                    Err(e) => {
                        error!(run_id = %run_id, stage = %stage.name, "Cannot publish outputs: {}", e);
                        result = RunResult::Failed;
                    }
                }
            }
            gate.record(index, result);

            let environment = stage.environment.as_ref().map(|env| DeploymentEnvironment {
                name: env.name.clone(),
                url: env
                    .url
                    .as_ref()
                    .map(|url| render_template(url, &context.base_variables())),
            });
            if result.is_success() {
                if let Some(url) = environment.as_ref().and_then(|e| e.url.clone()) {
                    info!(run_id = %run_id, "Environment available at {}", url);
                    environment_url = Some(url);
                }
            }

            info!(run_id = %run_id, stage = %stage.name, "Stage {}", result);
            self.events.emit(ExecutionEvent::StageFinished {
                run_id,
                stage: stage.name.clone(),
                result,
            });

            stages.push(StageReport {
                name: stage.name.clone(),
                result: Some(result),
                jobs: JobReport::group(instances),
                environment,
            });
        }

        let mut result = gate.result();
        if cancel.is_cancelled() && !result.is_success() {
            result = RunResult::Cancelled;
        }

        if let Err(e) = workspace.cleanup().await {
            warn!(run_id = %run_id, "Could not remove run workspace: {}", e);
        }

        info!(run_id = %run_id, "Run {}", result);
        self.events.emit(ExecutionEvent::RunFinished { run_id, result });

        Ok(RunReport {
            run_id,
            pipeline: definition.name.clone(),
            event: spec.event.kind,
            branch: spec.event.branch.clone(),
            actor: spec.event.actor.clone(),
            result,
            stages,
            outputs: gate.outputs().cloned().unwrap_or_default(),
            environment_url,
            started_at,
            finished_at: Utc::now(),
        })
    }

    /// Report for a run cancelled before it started
    pub fn cancelled_report(&self, definition: &PipelineDefinition, spec: &RunSpec) -> RunReport {
        let now = Utc::now();
        self.events.emit(ExecutionEvent::RunFinished {
            run_id: spec.run_id,
            result: RunResult::Cancelled,
        });
        RunReport {
            run_id: spec.run_id,
            pipeline: definition.name.clone(),
            event: spec.event.kind,
            branch: spec.event.branch.clone(),
            actor: spec.event.actor.clone(),
            result: RunResult::Cancelled,
            stages: definition
                .stages
                .iter()
                .map(|s| StageReport {
                    name: s.name.clone(),
                    result: None,
                    jobs: Vec::new(),
                    environment: None,
                })
                .collect(),
            outputs: BTreeMap::new(),
            environment_url: None,
            started_at: now,
            finished_at: now,
        }
    }
}
