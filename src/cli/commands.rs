//! CLI command definitions

use crate::core::trigger::EventKind;
use clap::Args;
use std::path::PathBuf;

/// Trigger a pipeline run
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: String,

    /// Kind of event to simulate
    #[arg(long, value_enum, default_value_t = EventArg::Push)]
    pub event: EventArg,

    /// Branch the event refers to
    #[arg(long, default_value = "main")]
    pub branch: String,

    /// Who triggered the run (defaults to $USER)
    #[arg(long)]
    pub actor: Option<String>,

    /// Dispatch inputs for manual runs (key=value)
    #[arg(long, value_parser = parse_key_value)]
    pub input: Vec<(String, String)>,

    /// Environment variable to expose to steps as a secret
    #[arg(long)]
    pub secret: Vec<String>,

    /// Source directory used by `checkout` (defaults to the current directory)
    #[arg(long)]
    pub source: Option<PathBuf>,

    /// Root directory for run workspaces
    #[arg(long)]
    pub workspace: Option<PathBuf>,

    /// Directory `deploy-pages` publishes into
    #[arg(long)]
    pub publish_dir: Option<PathBuf>,

    /// Maximum concurrently running job instances
    #[arg(long, value_parser = clap::value_parser!(u16).range(1..))]
    pub max_parallel: Option<u16>,

    /// Per-step timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Keep run workspaces after completion
    #[arg(long)]
    pub keep_workspaces: bool,

    /// Don't save the run to history
    #[arg(long)]
    pub no_history: bool,
}

/// Validate a pipeline configuration
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// List pipelines in run history
#[derive(Debug, Args, Clone)]
pub struct ListCommand {
    /// Show run counts
    #[arg(long)]
    pub with_counts: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show run history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Pipeline name to filter by
    #[arg(short, long)]
    pub pipeline: Option<String>,

    /// Number of recent runs to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,

    /// Show a specific run
    #[arg(long)]
    pub run_id: Option<String>,
}

/// Event kind argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum EventArg {
    Push,
    Manual,
}

impl From<EventArg> for EventKind {
    fn from(arg: EventArg) -> Self {
        match arg {
            EventArg::Push => EventKind::Push,
            EventArg::Manual => EventKind::Manual,
        }
    }
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("Invalid key=value pair: {}", s)),
    }
}
