//! Execution state models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Terminal outcome of a step, job instance, job, stage or run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunResult {
    Succeeded,
    Failed,
    Cancelled,
}

impl RunResult {
    pub fn is_success(self) -> bool {
        self == RunResult::Succeeded
    }

    /// AND-reduction: everything must succeed for the aggregate to succeed.
    ///
    /// A failure outranks a cancellation so that a real error is never
    /// masked by the teardown that follows it. An empty set succeeds.
    pub fn aggregate<I>(results: I) -> RunResult
    where
        I: IntoIterator<Item = RunResult>,
    {
        results
            .into_iter()
            .fold(RunResult::Succeeded, |acc, next| acc.and(next))
    }

    pub fn and(self, other: RunResult) -> RunResult {
        match (self, other) {
            (RunResult::Failed, _) | (_, RunResult::Failed) => RunResult::Failed,
            (RunResult::Cancelled, _) | (_, RunResult::Cancelled) => RunResult::Cancelled,
            _ => RunResult::Succeeded,
        }
    }
}

impl std::fmt::Display for RunResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            RunResult::Succeeded => "succeeded",
            RunResult::Failed => "failed",
            RunResult::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

impl std::str::FromStr for RunResult {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "succeeded" => Ok(RunResult::Succeeded),
            "failed" => Ok(RunResult::Failed),
            "cancelled" => Ok(RunResult::Cancelled),
            other => Err(format!("unknown run result '{}'", other)),
        }
    }
}

/// Why a step did not succeed
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepFailure {
    /// The tool ran and reported non-success
    #[error("exited with status {}", exit_code_label(.code))]
    ExitStatus { code: Option<i32> },

    /// The tool could not be invoked at all
    #[error("infrastructure error: {reason}")]
    Infrastructure { reason: String },

    /// The tool exceeded its time budget and was terminated
    #[error("timed out after {secs} seconds")]
    TimedOut { secs: u64 },
}

impl StepFailure {
    /// Infrastructure problems are flagged separately for operators
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, StepFailure::Infrastructure { .. })
    }
}

fn exit_code_label(code: &Option<i32>) -> String {
    code.map(|c| c.to_string())
        .unwrap_or_else(|| "unknown (killed by signal)".to_string())
}

/// Lifecycle status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    /// Waiting for its concurrency group
    Pending,
    /// Stages are executing
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Succeeded | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

impl From<RunResult> for RunStatus {
    fn from(result: RunResult) -> Self {
        match result {
            RunResult::Succeeded => RunStatus::Succeeded,
            RunResult::Failed => RunStatus::Failed,
            RunResult::Cancelled => RunStatus::Cancelled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid run transition from {from:?} to {to:?}")]
pub struct InvalidTransition {
    pub from: RunStatus,
    pub to: RunStatus,
}

/// State machine for a single run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Set once cancellation was requested while the run was executing
    pub cancel_requested: bool,
}

impl RunState {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            status: RunStatus::Pending,
            queued_at: Utc::now(),
            started_at: None,
            finished_at: None,
            cancel_requested: false,
        }
    }

    /// Pending -> Running
    pub fn start(&mut self) -> Result<(), InvalidTransition> {
        self.transition(RunStatus::Running)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Running -> terminal
    pub fn finish(&mut self, result: RunResult) -> Result<(), InvalidTransition> {
        self.transition(result.into())?;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Pending runs are cancelled outright; running runs only record the
    /// request and reach Cancelled through `finish`.
    pub fn cancel(&mut self) -> Result<(), InvalidTransition> {
        match self.status {
            RunStatus::Pending => {
                self.status = RunStatus::Cancelled;
                self.finished_at = Some(Utc::now());
                Ok(())
            }
            RunStatus::Running => {
                self.cancel_requested = true;
                Ok(())
            }
            from => Err(InvalidTransition {
                from,
                to: RunStatus::Cancelled,
            }),
        }
    }

    fn transition(&mut self, to: RunStatus) -> Result<(), InvalidTransition> {
        let allowed = match (self.status, to) {
            (RunStatus::Pending, RunStatus::Running) => true,
            (RunStatus::Pending, RunStatus::Cancelled) => true,
            (RunStatus::Running, next) => next.is_terminal(),
            _ => false,
        };
        if !allowed {
            return Err(InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }
}
