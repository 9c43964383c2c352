//! Pipeline execution engine

pub mod cancel;
pub mod concurrency;
pub mod dispatch;
pub mod engine;
pub mod events;
pub mod executor;
pub mod gate;
pub mod scheduler;
pub mod workspace;

pub use cancel::CancellationToken;
pub use concurrency::{ConcurrencyGroups, GroupLease, GroupTicket};
pub use dispatch::{Dispatcher, RunHandle};
pub use engine::{ExecutionEngine, RunError};
pub use events::{EventBus, EventHandler, ExecutionEvent};
pub use executor::{StepExecutor, StepOutcome};
pub use gate::{GateError, PipelineGate};
pub use scheduler::{JobScheduler, SchedulingStrategy};
pub use workspace::{InstanceWorkspace, RunWorkspace};
