//! ci-pipeline - A matrix-expanding CI pipeline engine with gated build and deploy stages

pub mod cli;
pub mod core;
pub mod execution;
pub mod persistence;
pub mod runner;

// Re-export commonly used types
pub use core::{
    JobInstance, PipelineDefinition, RunPlan, RunReport, RunResult, RunStatus, Secrets, Step,
    TriggerEvent,
};
pub use execution::{CancellationToken, Dispatcher, ExecutionEngine, ExecutionEvent, RunHandle};
pub use runner::{Invocation, LocalRunner, ShellRunner, ToolError, ToolOutput, ToolRunner};
