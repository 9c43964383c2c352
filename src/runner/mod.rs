//! External tool invocation
//!
//! Steps reach the outside world only through [`ToolRunner`]: input is the
//! rendered action, environment and working directory; output is an exit
//! status, captured streams and optional files on disk. A tool that ran and
//! exited non-zero returns `Ok` with that status; a tool that could not be
//! invoked at all returns `Err(ToolError)`.

pub mod actions;
pub mod response;
pub mod shell;

use crate::core::{pipeline::Repository, secret::Secrets, step::StepAction};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

pub use response::{ToolError, ToolOutput};
pub use shell::ShellRunner;

/// Trait for tool execution - allows for different implementations
#[async_trait]
pub trait ToolRunner: Send + Sync {
    /// Run one step invocation to completion
    async fn run(&self, invocation: &Invocation) -> Result<ToolOutput, ToolError>;
}

/// A fully rendered step, ready to hand to a tool
#[derive(Clone)]
pub struct Invocation {
    pub step_id: String,

    pub action: StepAction,

    /// Rendered `with:` inputs
    pub inputs: BTreeMap<String, String>,

    /// Rendered environment (pipeline, job and step levels merged)
    pub env: BTreeMap<String, String>,

    /// Secrets exported to the process environment under their own names
    pub secrets: Secrets,

    /// Instance sandbox
    pub working_dir: PathBuf,

    /// Instance-private scratch space outside the sandbox
    pub state_dir: PathBuf,

    /// Run-scoped artifact store shared by the build and deploy stages
    pub artifacts_dir: PathBuf,

    /// Checkout source
    pub source_dir: Option<PathBuf>,

    pub publish_dir: PathBuf,

    pub repository: Repository,
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Env values may carry rendered secrets; only keys are shown
        f.debug_struct("Invocation")
            .field("step_id", &self.step_id)
            .field("action", &self.secrets_redacted_action())
            .field("env", &self.env.keys().collect::<Vec<_>>())
            .field("working_dir", &self.working_dir)
            .finish_non_exhaustive()
    }
}

impl Invocation {
    /// Action text safe to log
    pub fn secrets_redacted_action(&self) -> String {
        match &self.action {
            StepAction::Command(run) => self.secrets.redact(run),
            StepAction::Action(uses) => format!("uses {}", uses),
        }
    }
}

/// Default runner: shell commands through [`ShellRunner`], `uses:` through
/// the built-in actions
#[derive(Debug, Clone, Default)]
pub struct LocalRunner {
    shell: ShellRunner,
}

impl LocalRunner {
    pub fn new(shell: ShellRunner) -> Self {
        Self { shell }
    }
}

#[async_trait]
impl ToolRunner for LocalRunner {
    async fn run(&self, invocation: &Invocation) -> Result<ToolOutput, ToolError> {
        match &invocation.action {
            StepAction::Command(script) => self.shell.run(script, invocation).await,
            StepAction::Action(name) => actions::run(name, invocation).await,
        }
    }
}
