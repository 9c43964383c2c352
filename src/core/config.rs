//! Pipeline configuration from YAML

use crate::core::{pipeline::PipelineDefinition, secret::Secrets};
use crate::runner::actions::{self, DEPLOY_PAGES};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_yaml::Mapping;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level pipeline configuration loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline name
    pub name: String,

    /// Repository slug, `owner/name`
    pub repository: String,

    /// Events that start a run
    #[serde(default, rename = "on")]
    pub triggers: TriggerConfig,

    /// Environment-level permissions (scope -> level)
    #[serde(default)]
    pub permissions: BTreeMap<String, PermissionLevel>,

    #[serde(default)]
    pub concurrency: Option<ConcurrencyConfig>,

    /// Cap on concurrently running job instances
    #[serde(default)]
    pub max_parallel: Option<usize>,

    /// Default timeout for steps (in seconds)
    #[serde(default)]
    pub default_timeout_secs: Option<u64>,

    /// Grace period for cooperative cancellation (in seconds)
    #[serde(default)]
    pub cancel_grace_secs: Option<u64>,

    /// Environment shared by every step
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Stages, executed in order
    pub stages: Vec<StageConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriggerConfig {
    #[serde(default)]
    pub push: Option<PushConfig>,

    #[serde(default)]
    pub manual: Option<ManualConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PushConfig {
    /// Branch name patterns; empty matches every branch
    #[serde(default)]
    pub branches: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManualConfig {
    /// Input names with their default values
    #[serde(default)]
    pub inputs: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionLevel {
    None,
    Read,
    Write,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    /// Group key; may reference run variables such as `{{ branch }}`
    pub group: String,

    /// Cancel the active run of the group when a new one starts
    #[serde(default)]
    pub cancel_in_progress: bool,
}

/// Stage configuration as defined in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    pub name: String,

    #[serde(default)]
    pub environment: Option<EnvironmentConfig>,

    pub jobs: Vec<JobConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    pub name: String,

    #[serde(default)]
    pub url: Option<String>,
}

/// Job configuration as defined in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Unique job identifier
    pub id: String,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub strategy: Option<StrategyConfig>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    pub steps: Vec<StepConfig>,

    /// Outputs published when the job succeeds (key -> template)
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Axes in declaration order; checked when the run is planned
    #[serde(default)]
    pub matrix: Mapping,

    #[serde(default)]
    pub max_parallel: Option<usize>,
}

/// Step configuration as defined in YAML
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepConfig {
    #[serde(default)]
    pub id: Option<String>,

    #[serde(default)]
    pub name: Option<String>,

    /// Built-in action to invoke
    #[serde(default)]
    pub uses: Option<String>,

    /// Shell command body
    #[serde(default)]
    pub run: Option<String>,

    #[serde(default)]
    pub with: BTreeMap<String, String>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Timeout for this step (overrides global)
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl PipelineConfig {
    /// Load pipeline configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse pipeline configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: PipelineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the pipeline configuration
    ///
    /// Matrix contents are not checked here: empty or malformed axes fail
    /// the run when it is planned, before any job starts.
    pub fn validate(&self) -> Result<()> {
        crate::core::pipeline::Repository::parse(&self.repository)?;

        if self.stages.is_empty() {
            anyhow::bail!("Pipeline '{}' has no stages", self.name);
        }

        if self.max_parallel == Some(0) {
            anyhow::bail!("max_parallel must be at least 1");
        }

        let mut stage_names = HashSet::new();
        let mut job_ids = HashSet::new();

        for stage in &self.stages {
            if !stage_names.insert(&stage.name) {
                anyhow::bail!("Duplicate stage name: {}", stage.name);
            }
            if stage.jobs.is_empty() {
                anyhow::bail!("Stage '{}' has no jobs", stage.name);
            }

            for job in &stage.jobs {
                if !job_ids.insert(&job.id) {
                    anyhow::bail!("Duplicate job ID: {}", job.id);
                }
                self.validate_job(job)?;
            }
        }

        Ok(())
    }

    fn validate_job(&self, job: &JobConfig) -> Result<()> {
        if job.steps.is_empty() {
            anyhow::bail!("Job '{}' has no steps", job.id);
        }
        if let Some(strategy) = &job.strategy {
            if strategy.max_parallel == Some(0) {
                anyhow::bail!("Job '{}' strategy.max_parallel must be at least 1", job.id);
            }
        }

        let mut step_ids = HashSet::new();
        for (index, step) in job.steps.iter().enumerate() {
            let label = step
                .id
                .clone()
                .unwrap_or_else(|| format!("#{}", index + 1));

            if let Some(id) = &step.id {
                if !step_ids.insert(id) {
                    anyhow::bail!("Job '{}' has duplicate step ID: {}", job.id, id);
                }
            }

            match (&step.uses, &step.run) {
                (Some(_), Some(_)) => anyhow::bail!(
                    "Step '{}' of job '{}' sets both 'uses' and 'run'",
                    label,
                    job.id
                ),
                (None, None) => anyhow::bail!(
                    "Step '{}' of job '{}' needs either 'uses' or 'run'",
                    label,
                    job.id
                ),
                (Some(uses), None) => {
                    if !actions::is_builtin(uses) {
                        anyhow::bail!(
                            "Step '{}' of job '{}' uses unknown action '{}'",
                            label,
                            job.id,
                            uses
                        );
                    }
                    if uses == DEPLOY_PAGES
                        && self.permissions.get("pages") != Some(&PermissionLevel::Write)
                    {
                        anyhow::bail!(
                            "Job '{}' deploys pages but the pipeline lacks 'pages: write' permission",
                            job.id
                        );
                    }
                }
                (None, Some(_)) => {}
            }
        }

        Ok(())
    }

    /// Convert config to the pipeline domain model
    pub fn to_definition(&self) -> Result<PipelineDefinition> {
        PipelineDefinition::from_config(self)
    }
}

/// Operator settings layered over a pipeline's own defaults
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Directory holding per-run workspaces
    pub workspace_root: PathBuf,

    /// Checkout source copied into each instance sandbox
    pub source_dir: Option<PathBuf>,

    /// Where `deploy-pages` publishes the artifact
    pub publish_dir: PathBuf,

    /// Secrets exposed to steps
    pub secrets: Secrets,

    /// Overrides the pipeline's `max_parallel`
    pub max_parallel: Option<usize>,

    /// Overrides the pipeline's `default_timeout_secs`
    pub step_timeout: Option<Duration>,

    /// Overrides the pipeline's `cancel_grace_secs`
    pub cancel_grace: Option<Duration>,

    /// Keep run workspaces after completion
    pub keep_workspaces: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        let root = std::env::temp_dir().join("ci-pipeline");
        Self {
            workspace_root: root.join("runs"),
            source_dir: None,
            publish_dir: root.join("published"),
            secrets: Secrets::new(),
            max_parallel: None,
            step_timeout: None,
            cancel_grace: None,
            keep_workspaces: false,
        }
    }
}

impl EngineSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace_root = root.into();
        self
    }

    pub fn with_source_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.source_dir = Some(dir.into());
        self
    }

    pub fn with_publish_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.publish_dir = dir.into();
        self
    }

    pub fn with_secrets(mut self, secrets: Secrets) -> Self {
        self.secrets = secrets;
        self
    }

    pub fn with_max_parallel(mut self, max: usize) -> Self {
        self.max_parallel = Some(max);
        self
    }

    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = Some(timeout);
        self
    }

    pub fn with_cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace = Some(grace);
        self
    }

    pub fn keep_workspaces(mut self, keep: bool) -> Self {
        self.keep_workspaces = keep;
        self
    }
}
