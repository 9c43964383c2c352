//! Job scheduler - runs the instances of a stage under a concurrency cap

use crate::{
    core::{
        context::RunContext,
        job::JobInstance,
        pipeline::StagePlan,
        report::{FailedStep, InstanceReport},
        state::{RunResult, StepFailure},
    },
    execution::{
        cancel::CancellationToken,
        events::{EventBus, ExecutionEvent},
        executor::StepExecutor,
        workspace::RunWorkspace,
    },
    runner::ToolRunner,
};
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

/// Strategy for scheduling instance execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulingStrategy {
    /// One instance at a time
    #[default]
    Sequential,

    /// Every instance at once
    Parallel,

    /// Limited parallelism (max N concurrent instances)
    LimitedParallel(usize),
}

impl SchedulingStrategy {
    /// Number of instances allowed to run at once out of `pending`
    pub fn max_concurrent(&self, pending: usize) -> usize {
        match self {
            SchedulingStrategy::Sequential => 1,
            SchedulingStrategy::Parallel => pending.max(1),
            SchedulingStrategy::LimitedParallel(max) => (*max).max(1),
        }
    }
}

/// Bounded FIFO pool of instance executions
pub struct JobScheduler<R> {
    executor: Arc<StepExecutor<R>>,
    strategy: SchedulingStrategy,
    events: EventBus,
}

impl<R: ToolRunner + 'static> JobScheduler<R> {
    pub fn new(executor: Arc<StepExecutor<R>>, strategy: SchedulingStrategy, events: EventBus) -> Self {
        Self {
            executor,
            strategy,
            events,
        }
    }

    /// Run every instance of `stage`.
    ///
    /// Instances start in plan order; a new one starts only when a running
    /// one finishes. An instance whose job is at its own limit is passed
    /// over for the next pending instance of another job. Once `cancel` fires no further instance starts and the
    /// pending ones are reported as cancelled. Reports come back in plan
    /// order, one per instance.
    pub async fn run_stage(
        &self,
        stage: &StagePlan,
        run: Arc<RunContext>,
        workspace: &RunWorkspace,
        cancel: &CancellationToken,
    ) -> Vec<InstanceReport> {
        let total = stage.instances.len();
        let limit = self.strategy.max_concurrent(total);
        let mut pending: VecDeque<usize> = (0..total).collect();
        let mut reports: Vec<Option<InstanceReport>> = vec![None; total];
        let mut running = JoinSet::new();
        let mut running_per_job: HashMap<&str, usize> = HashMap::new();

        info!(
            run_id = %run.run_id,
            stage = %stage.name,
            "Scheduling {} instances, at most {} at a time",
            total,
            limit
        );

        loop {
            while running.len() < limit && !cancel.is_cancelled() {
                let next = pending.iter().position(|&position| {
                    let job_id = stage.instances[position].job_id.as_str();
                    running_per_job.get(job_id).copied().unwrap_or(0) < stage.job_limit(job_id)
                });
                let Some(position) = next.and_then(|slot| pending.remove(slot)) else {
                    break;
                };
                let instance = stage.instances[position].clone();
                *running_per_job.entry(stage.instances[position].job_id.as_str()).or_default() += 1;

                self.events.emit(ExecutionEvent::InstanceStarted {
                    run_id: run.run_id,
                    stage: stage.name.clone(),
                    instance: instance.to_string(),
                });
                debug!(stage = %stage.name, "Starting {} ({} running)", instance, running.len() + 1);

                let executor = Arc::clone(&self.executor);
                let run = Arc::clone(&run);
                let workspace = workspace.clone();
                let cancel = cancel.clone();
                running.spawn(async move {
                    let report = executor.execute(&instance, &run, &workspace, &cancel).await;
                    (position, report)
                });
            }

            let Some(joined) = running.join_next().await else {
                break;
            };

            match joined {
                Ok((position, report)) => {
                    if let Some(count) = running_per_job.get_mut(stage.instances[position].job_id.as_str()) {
                        *count = count.saturating_sub(1);
                    }
                    self.events.emit(ExecutionEvent::InstanceFinished {
                        run_id: run.run_id,
                        stage: stage.name.clone(),
                        instance: stage.instances[position].to_string(),
                        result: report.result,
                    });
                    reports[position] = Some(report);
                }
                Err(e) => error!(stage = %stage.name, "Instance task aborted: {}", e),
            }
        }

        if !pending.is_empty() {
            info!(
                run_id = %run.run_id,
                stage = %stage.name,
                "Run cancelled, {} instances not started",
                pending.len()
            );
        }

        stage
            .instances
            .iter()
            .zip(reports)
            .enumerate()
            .map(|(position, (instance, report))| match report {
                Some(report) => report,
                None if pending.contains(&position) => {
                    InstanceReport::not_started(&instance.job_id, instance.index, instance.coordinate.clone())
                }
                None => aborted(instance),
            })
            .collect()
    }
}

/// Report for an instance whose task panicked
fn aborted(instance: &JobInstance) -> InstanceReport {
    InstanceReport {
        result: RunResult::Failed,
        failed_step: instance.steps.first().map(|step| FailedStep {
            index: 0,
            step_id: step.id.clone(),
            failure: StepFailure::Infrastructure {
                reason: "instance task aborted".to_string(),
            },
        }),
        started_at: Some(Utc::now()),
        ..InstanceReport::not_started(&instance.job_id, instance.index, instance.coordinate.clone())
    }
}
