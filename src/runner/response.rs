//! Tool output and error types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// The tool could not be invoked at all
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("program not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("failed to spawn: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// What a tool produced when it ran
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolOutput {
    /// Exit code; `None` when the process was killed by a signal
    pub exit_code: Option<i32>,

    pub stdout: String,

    pub stderr: String,

    /// Output variables visible to later steps of the same instance
    pub outputs: BTreeMap<String, String>,
}

impl ToolOutput {
    pub fn success() -> Self {
        Self {
            exit_code: Some(0),
            ..Default::default()
        }
    }

    pub fn failure(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code: Some(code),
            stderr: stderr.into(),
            ..Default::default()
        }
    }

    pub fn with_output(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.outputs.insert(key.into(), value.into());
        self
    }

    pub fn with_stdout(mut self, stdout: impl Into<String>) -> Self {
        self.stdout = stdout.into();
        self
    }

    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Last `max_lines` lines across stdout and stderr
    pub fn tail(&self, max_lines: usize) -> Vec<String> {
        let lines: Vec<&str> = self.stdout.lines().chain(self.stderr.lines()).collect();
        let skip = lines.len().saturating_sub(max_lines);
        lines[skip..].iter().map(|l| l.to_string()).collect()
    }
}

/// Parse `key=value` lines written by a step to its output file
pub fn parse_output_file(content: &str) -> BTreeMap<String, String> {
    content
        .lines()
        .filter_map(|line| {
            let line = line.trim_end_matches('\r');
            let (key, value) = line.split_once('=')?;
            let key = key.trim();
            if key.is_empty() {
                None
            } else {
                Some((key.to_string(), value.to_string()))
            }
        })
        .collect()
}
