//! Dispatcher - turns trigger events into running, cancellable runs

use crate::{
    core::{
        context::RunContext,
        pipeline::PipelineDefinition,
        report::RunReport,
        secret::Secrets,
        state::{RunResult, RunState, RunStatus},
        trigger::{evaluate_trigger, TriggerEvent},
    },
    execution::{
        cancel::CancellationToken,
        concurrency::{ConcurrencyGroups, GroupTicket},
        engine::{ExecutionEngine, RunError},
        events::ExecutionEvent,
    },
    runner::ToolRunner,
};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Starts runs of one pipeline, honouring its concurrency group
pub struct Dispatcher<R> {
    engine: Arc<ExecutionEngine<R>>,
    definition: Arc<PipelineDefinition>,
    groups: Arc<ConcurrencyGroups>,
}

impl<R: ToolRunner + 'static> Dispatcher<R> {
    pub fn new(engine: Arc<ExecutionEngine<R>>, definition: PipelineDefinition) -> Self {
        Self {
            engine,
            definition: Arc::new(definition),
            groups: ConcurrencyGroups::new(),
        }
    }

    /// Share a group registry with other dispatchers
    pub fn with_groups(mut self, groups: Arc<ConcurrencyGroups>) -> Self {
        self.groups = groups;
        self
    }

    pub fn groups(&self) -> &Arc<ConcurrencyGroups> {
        &self.groups
    }

    pub fn definition(&self) -> &PipelineDefinition {
        &self.definition
    }

    /// Start a run for `event`, or return `None` when no trigger matches.
    ///
    /// Group registration happens before this returns, so runs dispatched
    /// one after another queue in that order. Must be called within a
    /// tokio runtime.
    pub fn dispatch(&self, event: &TriggerEvent) -> Option<RunHandle> {
        let Some(spec) = evaluate_trigger(&self.definition, event) else {
            debug!(
                pipeline = %self.definition.name,
                branch = %event.branch,
                "No trigger matched {} event",
                event.kind
            );
            return None;
        };

        let run_id = spec.run_id;
        let cancel = CancellationToken::new();
        let (status_tx, status_rx) = watch::channel(RunStatus::Pending);

        let ticket = self.definition.concurrency.as_ref().map(|group| {
            let variables = RunContext::new(&self.definition, spec.clone(), Secrets::new()).base_variables();
            let key = group.key_for(&variables);
            let ticket = self
                .groups
                .enter(&key, group.cancel_in_progress, run_id, cancel.clone());
            if matches!(ticket, GroupTicket::Queued { .. }) {
                info!(run_id = %run_id, group = %key, "Run queued behind active run");
                self.engine.events().emit(ExecutionEvent::RunQueued {
                    run_id,
                    pipeline: self.definition.name.clone(),
                    group: key,
                });
            }
            ticket
        });

        let engine = Arc::clone(&self.engine);
        let definition = Arc::clone(&self.definition);
        let run_cancel = cancel.clone();

        let task = tokio::spawn(async move {
            let mut state = RunState::new(run_id);

            let _lease = match ticket {
                None => None,
                Some(GroupTicket::Admitted(lease)) => Some(lease),
                Some(GroupTicket::Queued { lease, wake }) => {
                    tokio::select! {
                        _ = wake => {}
                        _ = run_cancel.cancelled() => {}
                    }
                    Some(lease)
                }
            };

            if run_cancel.is_cancelled() {
                if let Err(e) = state.cancel() {
                    warn!(run_id = %run_id, "{}", e);
                }
                status_tx.send_replace(state.status);
                info!(run_id = %run_id, "Run cancelled before start");
                return Ok(engine.cancelled_report(&definition, &spec));
            }

            if let Err(e) = state.start() {
                warn!(run_id = %run_id, "{}", e);
            }
            status_tx.send_replace(state.status);

            let outcome = engine.execute(&definition, &spec, run_cancel.clone()).await;

            let result = match &outcome {
                Ok(report) => report.result,
                Err(_) => RunResult::Failed,
            };
            if let Err(e) = state.finish(result) {
                warn!(run_id = %run_id, "{}", e);
            }
            status_tx.send_replace(state.status);

            outcome
        });

        Some(RunHandle {
            run_id,
            cancel,
            status: status_rx,
            task,
        })
    }
}

/// Handle to a dispatched run
#[derive(Debug)]
pub struct RunHandle {
    run_id: Uuid,
    cancel: CancellationToken,
    status: watch::Receiver<RunStatus>,
    task: JoinHandle<Result<RunReport, RunError>>,
}

impl RunHandle {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Request cancellation; a queued run never starts
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn status(&self) -> RunStatus {
        *self.status.borrow()
    }

    /// Resolves once the run reaches `status`
    pub async fn wait_for_status(&mut self, status: RunStatus) -> bool {
        self.status.wait_for(|s| *s == status).await.is_ok()
    }

    /// Wait for the run to finish
    pub async fn wait(self) -> Result<RunReport, RunError> {
        self.task
            .await
            .map_err(|e| RunError::Aborted(e.to_string()))?
    }
}
