//! Events emitted while a run executes

use crate::core::state::{RunResult, StepFailure};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use uuid::Uuid;

/// Events that can occur during a run
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ExecutionEvent {
    /// Waiting behind another run of the same concurrency group
    RunQueued {
        run_id: Uuid,
        pipeline: String,
        group: String,
    },
    RunStarted {
        run_id: Uuid,
        pipeline: String,
        instances: usize,
    },
    StageStarted {
        run_id: Uuid,
        stage: String,
        instances: usize,
        max_parallel: usize,
    },
    StageSkipped {
        run_id: Uuid,
        stage: String,
        reason: String,
    },
    InstanceStarted {
        run_id: Uuid,
        stage: String,
        instance: String,
    },
    StepStarted {
        run_id: Uuid,
        instance: String,
        step_id: String,
        name: String,
    },
    StepFinished {
        run_id: Uuid,
        instance: String,
        step_id: String,
        result: RunResult,
        failure: Option<StepFailure>,
    },
    InstanceFinished {
        run_id: Uuid,
        stage: String,
        instance: String,
        result: RunResult,
    },
    StageFinished {
        run_id: Uuid,
        stage: String,
        result: RunResult,
    },
    OutputsPublished {
        run_id: Uuid,
        outputs: BTreeMap<String, String>,
    },
    RunFinished {
        run_id: Uuid,
        result: RunResult,
    },
}

impl ExecutionEvent {
    pub fn run_id(&self) -> Uuid {
        match self {
            ExecutionEvent::RunQueued { run_id, .. }
            | ExecutionEvent::RunStarted { run_id, .. }
            | ExecutionEvent::StageStarted { run_id, .. }
            | ExecutionEvent::StageSkipped { run_id, .. }
            | ExecutionEvent::InstanceStarted { run_id, .. }
            | ExecutionEvent::StepStarted { run_id, .. }
            | ExecutionEvent::StepFinished { run_id, .. }
            | ExecutionEvent::InstanceFinished { run_id, .. }
            | ExecutionEvent::StageFinished { run_id, .. }
            | ExecutionEvent::OutputsPublished { run_id, .. }
            | ExecutionEvent::RunFinished { run_id, .. } => *run_id,
        }
    }
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(&ExecutionEvent) + Send + Sync>;

/// Fan-out of events to registered handlers
#[derive(Clone, Default)]
pub struct EventBus {
    handlers: Arc<RwLock<Vec<EventHandler>>>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("handlers", &self.len())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, handler: F)
    where
        F: Fn(&ExecutionEvent) + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(handler));
    }

    /// Emit an event to all handlers
    pub fn emit(&self, event: ExecutionEvent) {
        let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        for handler in handlers.iter() {
            handler(&event);
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
