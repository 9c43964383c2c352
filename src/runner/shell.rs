//! Shell subprocess runner - runs `run:` step bodies

use crate::runner::{
    response::{parse_output_file, ToolError, ToolOutput},
    Invocation,
};
use std::collections::BTreeMap;
use std::io;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

/// Environment variable naming the file a step writes `key=value` outputs to
pub const OUTPUT_ENV: &str = "CI_OUTPUT";

/// Runs scripts through a shell as a subprocess
#[derive(Debug, Clone)]
pub struct ShellRunner {
    /// Shell executable
    program: String,

    /// Arguments placed before the script
    args: Vec<String>,
}

impl Default for ShellRunner {
    fn default() -> Self {
        if cfg!(target_os = "windows") {
            Self::new("cmd", vec!["/C".to_string()])
        } else {
            Self::new("sh", vec!["-c".to_string()])
        }
    }
}

impl ShellRunner {
    /// Create a runner for a specific shell
    ///
    /// # Arguments
    /// * `program` - Shell executable (e.g., "sh", "/bin/bash")
    /// * `args` - Arguments preceding the script (e.g., `["-c"]`)
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Execute a script in the invocation's working directory
    ///
    /// # Errors
    /// Returns `ToolError` if the shell cannot be spawned, or if the shell
    /// reports that a command is missing (127) or not executable (126). Any
    /// other non-zero exit is `Ok` with that exit code.
    pub async fn run(&self, script: &str, invocation: &Invocation) -> Result<ToolOutput, ToolError> {
        tokio::fs::create_dir_all(&invocation.state_dir).await?;
        let output_file = invocation
            .state_dir
            .join(format!("{}.outputs", sanitize(&invocation.step_id)));
        tokio::fs::write(&output_file, b"").await?;

        debug!(
            step = %invocation.step_id,
            shell = %self.program,
            "Spawning shell with script length: {}",
            script.len()
        );

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg(script)
            .current_dir(&invocation.working_dir)
            .envs(&invocation.env)
            .env(OUTPUT_ENV, &output_file)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        for (name, secret) in invocation.secrets.iter() {
            command.env(name, secret.expose());
        }

        let output = command
            .output()
            .await
            .map_err(|e| classify_spawn_error(e, &self.program))?;

        let outputs = match tokio::fs::read_to_string(&output_file).await {
            Ok(content) => parse_output_file(&content),
            Err(e) => {
                warn!(step = %invocation.step_id, "Could not read step outputs: {}", e);
                BTreeMap::new()
            }
        };

        let result = ToolOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            outputs,
        };

        debug!(
            step = %invocation.step_id,
            "Shell exited with {:?} ({} bytes of output)",
            result.exit_code,
            result.stdout.len() + result.stderr.len()
        );

        if cfg!(unix) {
            match result.exit_code {
                Some(127) => return Err(ToolError::NotFound(shell_complaint(&result, "command not found"))),
                Some(126) => {
                    return Err(ToolError::PermissionDenied(shell_complaint(&result, "command not executable")))
                }
                _ => {}
            }
        }

        Ok(result)
    }
}

fn classify_spawn_error(err: io::Error, program: &str) -> ToolError {
    match err.kind() {
        io::ErrorKind::NotFound => ToolError::NotFound(program.to_string()),
        io::ErrorKind::PermissionDenied => ToolError::PermissionDenied(program.to_string()),
        _ => ToolError::Spawn(err),
    }
}

/// Last line the shell wrote to stderr, which names the offending command
fn shell_complaint(output: &ToolOutput, fallback: &str) -> String {
    output
        .stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or(fallback)
        .to_string()
}

fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
